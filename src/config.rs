use crate::lights::{LightMap, LightSet};
use serde::Deserialize;
use std::{collections::BTreeMap, env, fs, path::PathBuf};

#[derive(Debug, Deserialize)]
struct ConfigFile {
    bridge_host: String,
    #[serde(default)]
    bridge_username: Option<String>,
    #[serde(default = "all_lights_default")]
    all_lights: LightSet,
    #[serde(default)]
    light_names: BTreeMap<String, u32>,
    #[serde(default)]
    virtual_lights: BTreeMap<u32, u32>,
    #[serde(default)]
    schedule_db: Option<PathBuf>,
}

fn all_lights_default() -> LightSet {
    LightSet::All
}

/// Deployment configuration for an installation: where the bridge
/// lives, which lights the orchestrator manages, and where schedules
/// persist.
#[derive(Debug)]
pub struct OrchestratorConfig {
    pub bridge_host: String,
    pub bridge_username: Option<String>,
    /// The lights the context stack samples and restores.
    pub all_lights: LightSet,
    /// Friendly names for light ids, for the surrounding service.
    pub light_names: BTreeMap<String, u32>,
    /// Virtual-to-physical id mapping for replaced fixtures.
    pub virtual_lights: LightMap,
    /// Path of the schedule database; `None` disables persistence.
    pub schedule_db: Option<PathBuf>,
}

impl OrchestratorConfig {
    /// Loads configuration from the resolved default path.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&resolve_config_path()?)
    }

    /// Loads configuration from a specific file.
    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: ConfigFile = serde_json::from_str(&raw)?;
        Ok(Self {
            bridge_host: expand_env_vars(&cfg.bridge_host),
            bridge_username: cfg.bridge_username.as_deref().map(expand_env_vars),
            all_lights: cfg.all_lights,
            light_names: cfg.light_names,
            virtual_lights: LightMap::new(cfg.virtual_lights),
            schedule_db: cfg.schedule_db,
        })
    }
}

pub fn resolve_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(p) = env::var("LUMEN_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("lumen").join("lumen.json");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = PathBuf::from("lumen.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "Could not find lumen.json (set LUMEN_CONFIG or create ./lumen.json)"
    ))
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "bridge_host": "bridge.local",
                "bridge_username": "operator",
                "all_lights": "1,2,3,5",
                "light_names": {{"porch": 5, "kitchen": 2}},
                "virtual_lights": {{"3": 13}},
                "schedule_db": "/var/lib/lumen/schedules.json"
            }}"#
        )
        .unwrap();

        let config = OrchestratorConfig::load_from(file.path()).unwrap();
        assert_eq!("bridge.local", config.bridge_host);
        assert_eq!(Some("operator".to_string()), config.bridge_username);
        assert_eq!(LightSet::new([1, 2, 3, 5]), config.all_lights);
        assert_eq!(Some(&5), config.light_names.get("porch"));
        assert_eq!(13, config.virtual_lights.convert(3));
        assert_eq!(99, config.virtual_lights.convert(99));
        assert_eq!(
            PathBuf::from("/var/lib/lumen/schedules.json"),
            config.schedule_db.unwrap()
        );
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"bridge_host": "10.0.0.2"}}"#).unwrap();

        let config = OrchestratorConfig::load_from(file.path()).unwrap();
        assert_eq!(LightSet::All, config.all_lights);
        assert!(config.bridge_username.is_none());
        assert!(config.schedule_db.is_none());
        assert_eq!(7, config.virtual_lights.convert(7));
    }

    #[test]
    fn env_vars_expand_in_strings() {
        unsafe {
            env::set_var("LUMEN_TEST_BRIDGE", "bridge.example");
        }
        assert_eq!(
            "http://bridge.example/api",
            expand_env_vars("http://${LUMEN_TEST_BRIDGE}/api")
        );
        // Unknown names are kept verbatim.
        assert_eq!(
            "${LUMEN_TEST_MISSING}",
            expand_env_vars("${LUMEN_TEST_MISSING}")
        );
    }
}
