//! Template registry.
//!
//! Templates are YAML documents compiled into the binary. A directory of `*.yaml` files
//! may replace or extend them at startup. After loading, the registry is read-only and
//! shared behind an `Arc`.

use std::path::{Component, Path};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml_ng as serde_yaml;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{OrchestratorError, Result};

/// Template used when the caller does not name one.
pub const DEFAULT_TEMPLATE_ID: &str = "node-hello";

/// Embedded template documents
fn embedded_templates() -> [(&'static str, &'static str); 10] {
    [
        ("node-hello", include_str!("../templates/node-hello.yaml")),
        ("react-app", include_str!("../templates/react-app.yaml")),
        ("express-app", include_str!("../templates/express-app.yaml")),
        ("python-core", include_str!("../templates/python-core.yaml")),
        ("fastapi-app", include_str!("../templates/fastapi-app.yaml")),
        ("go-api", include_str!("../templates/go-api.yaml")),
        ("rust-lang", include_str!("../templates/rust-lang.yaml")),
        ("cpp-hello", include_str!("../templates/cpp-hello.yaml")),
        ("php-lang", include_str!("../templates/php-lang.yaml")),
        ("html-site", include_str!("../templates/html-site.yaml")),
    ]
}

/// One way of telling that a template's application is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessCheck {
    /// Substring of one `ps aux` listing line.
    ProcessPattern { pattern: String },
    /// Something listens on this TCP port inside the container.
    PortProbe { port: u16 },
    /// Text present in the application log.
    LogMarker { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub image: String,
    pub language: String,
    #[serde(default)]
    pub compiler: Option<String>,
    #[serde(default)]
    pub build_tool: Option<String>,
    /// Container port published on an ephemeral host port.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub setup_script: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    /// Written to the workspace root before the container exists.
    #[serde(default)]
    pub seed_files: IndexMap<String, String>,
    /// Written after the setup script, replacing whatever it scaffolded.
    #[serde(default)]
    pub overlay_files: IndexMap<String, String>,
    #[serde(default)]
    pub readiness: Vec<ReadinessCheck>,
}

impl Template {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let template: Template = serde_yaml::from_str(content)
            .map_err(|e| OrchestratorError::Template(format!("invalid template document: {}", e)))?;
        template.validate()?;
        Ok(template)
    }

    /// All readiness checks, the start command itself first.
    pub fn readiness_checks(&self) -> Vec<ReadinessCheck> {
        let mut checks = Vec::with_capacity(self.readiness.len() + 1);
        if let Some(command) = &self.start_command {
            checks.push(ReadinessCheck::ProcessPattern {
                pattern: command.clone(),
            });
        }
        checks.extend(self.readiness.iter().cloned());
        checks
    }

    fn validate(&self) -> Result<()> {
        let fail = |reason: &str| Err(OrchestratorError::Template(format!("{}: {}", self.id, reason)));

        if self.id.trim().is_empty() {
            return Err(OrchestratorError::Template("template id is empty".to_string()));
        }
        if self.image.trim().is_empty() {
            return fail("image is empty");
        }
        if self.port == Some(0) {
            return fail("port must be between 1 and 65535");
        }
        if self.start_command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return fail("start_command is empty");
        }
        for path in self.seed_files.keys().chain(self.overlay_files.keys()) {
            if !is_plain_relative(path) {
                return fail(&format!("file path '{}' must be relative without '..'", path));
            }
        }
        for check in &self.readiness {
            match check {
                ReadinessCheck::ProcessPattern { pattern } if pattern.trim().is_empty() => {
                    return fail("empty process pattern");
                }
                ReadinessCheck::LogMarker { text } if text.trim().is_empty() => {
                    return fail("empty log marker");
                }
                ReadinessCheck::PortProbe { port: 0 } => return fail("port probe on port 0"),
                _ => {}
            }
        }
        Ok(())
    }
}

fn is_plain_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Immutable map of templates keyed by id.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: IndexMap<String, Arc<Template>>,
}

impl TemplateRegistry {
    /// Registry holding only the compiled-in templates.
    pub fn embedded() -> Result<Self> {
        let mut templates = IndexMap::new();
        for (id, content) in embedded_templates() {
            let template = Template::from_yaml(content)?;
            if template.id != id {
                return Err(OrchestratorError::Template(format!(
                    "embedded template '{}' declares id '{}'",
                    id, template.id
                )));
            }
            templates.insert(template.id.clone(), Arc::new(template));
        }
        Ok(Self { templates })
    }

    /// Embedded templates, then every `*.yaml` in `override_dir` (same id replaces).
    pub fn load(override_dir: Option<&Path>) -> Result<Self> {
        let mut registry = Self::embedded()?;

        let Some(dir) = override_dir else {
            info!(count = registry.len(), "Loaded embedded templates");
            return Ok(registry);
        };

        let mut paths: Vec<_> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| OrchestratorError::storage(&path, e))?;
            let template = Template::from_yaml(&content).map_err(|e| {
                OrchestratorError::Template(format!("{}: {}", path.display(), e))
            })?;
            debug!(template = %template.id, path = %path.display(), "Loaded template override");
            registry
                .templates
                .insert(template.id.clone(), Arc::new(template));
        }

        info!(count = registry.len(), dir = %dir.display(), "Loaded templates");
        Ok(registry)
    }

    pub fn from_templates(templates: Vec<Template>) -> Result<Self> {
        let mut map = IndexMap::new();
        for template in templates {
            template.validate()?;
            map.insert(template.id.clone(), Arc::new(template));
        }
        Ok(Self { templates: map })
    }

    pub fn get(&self, id: &str) -> Option<Arc<Template>> {
        self.templates.get(id).cloned()
    }

    pub fn require(&self, id: &str) -> Result<Arc<Template>> {
        self.get(id)
            .ok_or_else(|| OrchestratorError::InvalidInput(format!("unknown template '{}'", id)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values().map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
