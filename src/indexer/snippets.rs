// Embeddable code snippets derived from parsed files

use crate::index::{ClassInfo, CodeSnippet, FunctionInfo, ParsedFile};

/// One snippet per top-level function, one per method (`Class.method`) and
/// one declaration snippet for each class without methods.
pub fn extract_snippets(files: &[ParsedFile]) -> Vec<CodeSnippet> {
    let mut snippets = Vec::new();
    for file in files {
        for function in &file.functions {
            snippets.push(function_snippet(&file.file_path, function.name.clone(), function));
        }
        for class in &file.classes {
            if class.methods.is_empty() {
                snippets.push(class_snippet(&file.file_path, class));
                continue;
            }
            for method in &class.methods {
                let name = format!("{}.{}", class.name, method.name);
                snippets.push(function_snippet(&file.file_path, name, method));
            }
        }
    }
    snippets
}

fn function_snippet(file: &str, name: String, function: &FunctionInfo) -> CodeSnippet {
    let code = if function.body.trim().is_empty() {
        function.signature()
    } else {
        function.body.clone()
    };
    CodeSnippet {
        name,
        code,
        file: file.to_string(),
        start_line: function.start_line,
        end_line: function.end_line.max(function.start_line),
    }
}

fn class_snippet(file: &str, class: &ClassInfo) -> CodeSnippet {
    let mut code = String::from("class ");
    code.push_str(&class.name);
    if let Some(parent) = &class.extends {
        code.push_str(" extends ");
        code.push_str(parent);
    }
    if !class.implements.is_empty() {
        code.push_str(" implements ");
        code.push_str(&class.implements.join(", "));
    }
    if !class.properties.is_empty() {
        code.push_str(" {\n");
        for property in &class.properties {
            match &property.type_ {
                Some(ty) => code.push_str(&format!("  {}: {}\n", property.name, ty)),
                None => code.push_str(&format!("  {}\n", property.name)),
            }
        }
        code.push('}');
    }

    CodeSnippet {
        name: class.name.clone(),
        code,
        file: file.to_string(),
        start_line: class.start_line,
        end_line: class.end_line.max(class.start_line),
    }
}
