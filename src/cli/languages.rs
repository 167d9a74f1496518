use repograph::indexer::ParserRegistry;

pub fn list_languages() {
    let registry = ParserRegistry::new();

    println!("Supported languages:");
    for (language, extensions) in registry.languages() {
        let extensions: Vec<String> = extensions.iter().map(|e| format!(".{}", e)).collect();
        println!("  {:<12} {}", language, extensions.join(" "));
    }
}
