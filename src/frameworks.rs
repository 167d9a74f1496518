// Framework presets: detection by marker files plus extra exclude patterns

use std::path::Path;

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Framework {
    pub id: &'static str,
    pub name: &'static str,
    pub language: &'static str,
    /// Any of these paths existing under the repository root identifies the framework
    pub markers: &'static [&'static str],
    /// Added to the indexing exclude patterns
    pub exclude: &'static [&'static str],
}

/// Checked in order, so more specific presets come first
static PRESETS: &[Framework] = &[
    Framework {
        id: "nextjs",
        name: "Next.js",
        language: "typescript",
        markers: &["next.config.js", "next.config.mjs", "next.config.ts"],
        exclude: &[".next/"],
    },
    Framework {
        id: "angular",
        name: "Angular",
        language: "typescript",
        markers: &["angular.json"],
        exclude: &[".angular/", "*.spec.ts"],
    },
    Framework {
        id: "nestjs",
        name: "NestJS",
        language: "typescript",
        markers: &["nest-cli.json"],
        exclude: &["*.spec.ts"],
    },
    Framework {
        id: "django",
        name: "Django",
        language: "python",
        markers: &["manage.py"],
        exclude: &["migrations/", "static/"],
    },
    Framework {
        id: "spring-boot",
        name: "Spring Boot",
        language: "java",
        markers: &[
            "src/main/resources/application.properties",
            "src/main/resources/application.yml",
            "src/main/resources/application.yaml",
        ],
        exclude: &["src/test/"],
    },
    Framework {
        id: "maven",
        name: "Maven",
        language: "java",
        markers: &["pom.xml"],
        exclude: &["src/test/"],
    },
    Framework {
        id: "gradle",
        name: "Gradle",
        language: "java",
        markers: &["build.gradle", "build.gradle.kts", "settings.gradle"],
        exclude: &["src/test/"],
    },
    Framework {
        id: "go-modules",
        name: "Go modules",
        language: "go",
        markers: &["go.mod"],
        exclude: &["_test.go", "testdata/"],
    },
    Framework {
        id: "cargo",
        name: "Cargo",
        language: "rust",
        markers: &["Cargo.toml"],
        exclude: &["benches/"],
    },
    Framework {
        id: "python",
        name: "Python package",
        language: "python",
        markers: &["pyproject.toml", "setup.py", "requirements.txt"],
        exclude: &["tests/"],
    },
    Framework {
        id: "node",
        name: "Node.js",
        language: "typescript",
        markers: &["package.json"],
        exclude: &["*.bundle.js"],
    },
];

pub fn presets() -> &'static [Framework] {
    PRESETS
}

pub fn find(id: &str) -> Option<&'static Framework> {
    PRESETS.iter().find(|f| f.id.eq_ignore_ascii_case(id))
}

/// First preset with a marker present under `root`
pub fn detect(root: &Path) -> Option<&'static Framework> {
    let found = PRESETS
        .iter()
        .find(|f| f.markers.iter().any(|marker| root.join(marker).exists()));
    if let Some(framework) = found {
        debug!("Detected {} in {}", framework.name, root.display());
    }
    found
}
