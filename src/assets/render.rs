//! Boot payload rendering
//!
//! Templates are compiled into the binary and rendered with minijinja in
//! strict mode, so a missing variable is an error rather than an empty
//! string.

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{Environment, UndefinedBehavior};

use super::AssetError;

pub const CLOUD_CONFIG_CONTROLLER: &str = "cloud-config-controller";
pub const CLOUD_CONFIG_WORKER: &str = "cloud-config-worker";
pub const STACK_TEMPLATE: &str = "stack-template";
pub const KUBECONFIG: &str = "kubeconfig";
pub const CLUSTER_CONFIG: &str = "cluster-config";

const BUILTIN_TEMPLATES: [(&str, &str); 5] = [
    (
        CLOUD_CONFIG_CONTROLLER,
        include_str!("templates/cloud-config-controller.j2"),
    ),
    (
        CLOUD_CONFIG_WORKER,
        include_str!("templates/cloud-config-worker.j2"),
    ),
    (STACK_TEMPLATE, include_str!("templates/stack-template.j2")),
    (KUBECONFIG, include_str!("templates/kubeconfig.j2")),
    (CLUSTER_CONFIG, include_str!("templates/cluster-config.j2")),
];

/// Template capability: named template plus variables in, bytes out.
/// Must be deterministic for identical input.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, vars: &serde_json::Value) -> Result<Vec<u8>, AssetError>;
}

/// [`TemplateRenderer`] over the built-in templates
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
}

impl MiniJinjaRenderer {
    pub fn new() -> Result<Self, AssetError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("b64encode", b64encode);

        for (name, source) in BUILTIN_TEMPLATES {
            env.add_template(name, source)
                .map_err(|e| AssetError::Template {
                    name: name.to_string(),
                    message: e.to_string(),
                })?;
        }

        Ok(Self { env })
    }
}

fn b64encode(value: String) -> String {
    STANDARD.encode(value)
}

impl TemplateRenderer for MiniJinjaRenderer {
    fn render(&self, name: &str, vars: &serde_json::Value) -> Result<Vec<u8>, AssetError> {
        let template_error = |e: minijinja::Error| AssetError::Template {
            name: name.to_string(),
            message: e.to_string(),
        };
        let template = self.env.get_template(name).map_err(template_error)?;
        let rendered = template.render(vars).map_err(template_error)?;
        Ok(rendered.into_bytes())
    }
}
