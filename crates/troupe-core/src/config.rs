use std::{collections::HashSet, fs, path::Path};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use troupe_provider::ProviderConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
}

fn default_turn_ceiling() -> usize {
    1000
}

fn default_database() -> String {
    "data/troupe.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Conversations longer than this are refused further processing.
    #[serde(default = "default_turn_ceiling")]
    pub turn_ceiling: usize,
    /// SQLite path, relative to the config root unless absolute.
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            turn_ceiling: default_turn_ceiling(),
            database: default_database(),
        }
    }
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider_id: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// A named persona: an actor the provider plays, or a human participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub handle: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConnectorConfig {
    pub connector_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChannelConfig {
    pub enabled: bool,
    #[serde(default)]
    pub connectors: Vec<TelegramConnectorConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: Option<TelegramChannelConfig>,
}

fn default_reset_reply() -> String {
    "reset done".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_reset_reply")]
    pub reset_reply: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            reset_reply: default_reset_reply(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainConfig {
    pub app: AppConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub participants: Vec<PersonaConfig>,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TroupeConfig {
    pub main: MainConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub actors: Vec<PersonaConfig>,
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Load `main.yaml`, `providers.d/*.yaml` and `actors.d/*.yaml` from `root`,
/// resolve `${VAR}` placeholders and validate the result.
pub fn load_config(root: &Path) -> Result<TroupeConfig> {
    let mut main: MainConfig = read_yaml_file(&root.join("main.yaml"))?;
    let mut providers = read_yaml_dir::<ProviderConfig>(&root.join("providers.d"))?;
    let mut actors = read_yaml_dir::<PersonaConfig>(&root.join("actors.d"))?;

    resolve_main_env(&mut main);
    resolve_providers_env(&mut providers);
    resolve_personas_env(&mut actors);

    let config = TroupeConfig {
        main,
        providers,
        actors,
    };

    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &TroupeConfig) -> Result<()> {
    if config.actors.is_empty() {
        return Err(anyhow!("no actors configured"));
    }

    let mut seen = HashSet::new();
    for persona in config.actors.iter().chain(&config.main.participants) {
        if persona.handle.trim().is_empty() {
            return Err(anyhow!("empty handle in actors or participants"));
        }
        if !seen.insert(persona.handle.as_str()) {
            return Err(anyhow!("duplicate handle: {}", persona.handle));
        }
    }

    let provider_id = &config.main.model.provider_id;
    if !config.providers.iter().any(|p| &p.id == provider_id) {
        return Err(anyhow!("unknown provider_id in model: {provider_id}"));
    }

    let temperature = config.main.model.temperature;
    if !(0.0..=2.0).contains(&temperature) {
        return Err(anyhow!("temperature out of range [0, 2]: {temperature}"));
    }

    if config.main.runtime.turn_ceiling == 0 {
        return Err(anyhow!("turn_ceiling must be greater than zero"));
    }

    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn read_yaml_dir<T>(dir: &Path) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("failed to read config dir: {}", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read dir entry: {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("yaml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        items.push(read_yaml_file::<T>(&path)?);
    }
    Ok(items)
}

fn resolve_main_env(main: &mut MainConfig) {
    main.app.name = resolve_env_var(&main.app.name);
    main.runtime.database = resolve_env_var(&main.runtime.database);
    main.model.provider_id = resolve_env_var(&main.model.provider_id);
    main.model.model = resolve_env_var(&main.model.model);
    main.commands.reset_reply = resolve_env_var(&main.commands.reset_reply);

    if let Some(telegram) = &mut main.channels.telegram {
        for connector in &mut telegram.connectors {
            connector.connector_id = resolve_env_var(&connector.connector_id);
            connector.token = resolve_env_var(&connector.token);
        }
    }

    resolve_personas_env(&mut main.participants);
}

fn resolve_providers_env(providers: &mut [ProviderConfig]) {
    for provider in providers {
        provider.id = resolve_env_var(&provider.id);
        if let Some(key) = &mut provider.api_key {
            *key = resolve_env_var(key);
        }
        if let Some(base_url) = &mut provider.base_url {
            *base_url = resolve_env_var(base_url);
        }
    }
}

fn resolve_personas_env(personas: &mut [PersonaConfig]) {
    for persona in personas {
        persona.handle = resolve_env_var(&persona.handle);
        persona.description = resolve_env_var(&persona.description);
    }
}
