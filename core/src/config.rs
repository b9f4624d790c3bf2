use crate::llm::{LlmProviderKind, DEFAULT_OPENAI_BASE_URL};
use crate::state::DEFAULT_SYSTEM_PROMPT;
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_IMAGE_FOLDER: &str = "parley";

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub provider: LlmProviderKind,
    pub openai_base_url: String,
    /// Seeds the stored credential when none is set yet.
    pub api_key: Option<String>,
    pub streaming: bool,
    pub system_prompt: String,
    pub imagekit: Option<ImageKitSettings>,
    pub server_addr: SocketAddr,
    /// Where a client reaches the image relay; `None` relays in-process.
    pub relay_endpoint: Option<String>,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageKitSettings {
    pub public_key: String,
    pub private_key: String,
    pub url_endpoint: String,
    pub folder: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Invalid(detail) => format!("Parley is misconfigured: {detail}. Update parley.yaml."),
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::OpenAi,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key: None,
            streaming: true,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            imagekit: None,
            server_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            relay_endpoint: None,
            data_dir: default_data_dir(),
        }
    }
}

impl RuntimeSettings {
    /// Loads `.env`, the first `parley.yaml` found, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let section = match locate_config_file() {
            Some(path) => read_app_section(&path)?,
            None => AppSection::default(),
        };
        resolve_app_settings(section, &EnvOverrides::capture())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let section = read_app_section(path)?;
        resolve_app_settings(section, &EnvOverrides::capture())
    }
}

fn read_app_section(path: &Path) -> Result<AppSection, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|err| {
        ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
    })?;
    let config: ParleyConfig = serde_yaml::from_str(&contents)
        .map_err(|err| ConfigError::Invalid(format!("invalid parley.yaml: {err}")))?;
    Ok(config.app.unwrap_or_default())
}

#[derive(Debug, Default)]
struct EnvOverrides {
    provider: Option<String>,
    openai_base_url: Option<String>,
    imagekit_public_key: Option<String>,
    imagekit_private_key: Option<String>,
    imagekit_url_endpoint: Option<String>,
    server_addr: Option<String>,
    data_dir: Option<String>,
}

impl EnvOverrides {
    fn capture() -> Self {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            provider: var("LLM_PROVIDER"),
            openai_base_url: var("OPENAI_BASE_URL"),
            imagekit_public_key: var("IMAGEKIT_PUBLIC_KEY"),
            imagekit_private_key: var("IMAGEKIT_PRIVATE_KEY"),
            imagekit_url_endpoint: var("IMAGEKIT_URL_ENDPOINT"),
            server_addr: var("PARLEY_SERVER_ADDR"),
            data_dir: var("PARLEY_DATA_DIR"),
        }
    }
}

fn resolve_app_settings(
    app: AppSection,
    env: &EnvOverrides,
) -> Result<RuntimeSettings, ConfigError> {
    let defaults = RuntimeSettings::default();

    let provider = match env.provider.as_deref().or(app.provider.as_deref()) {
        Some(raw) => LlmProviderKind::parse(raw)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown provider `{raw}`")))?,
        None => defaults.provider,
    };

    let openai = app.openai.unwrap_or_default();
    let openai_base_url = env
        .openai_base_url
        .clone()
        .or(non_blank(openai.base_url))
        .unwrap_or(defaults.openai_base_url);
    url::Url::parse(&openai_base_url).map_err(|err| {
        ConfigError::Invalid(format!("invalid OpenAI base url `{openai_base_url}`: {err}"))
    })?;

    let imagekit = resolve_imagekit(app.imagekit.unwrap_or_default(), env)?;

    let server = app.server.unwrap_or_default();
    let server_addr = match env.server_addr.clone().or(non_blank(server.addr)) {
        Some(raw) => raw
            .parse()
            .map_err(|err| ConfigError::Invalid(format!("invalid server addr `{raw}`: {err}")))?,
        None => defaults.server_addr,
    };

    let data_dir = env
        .data_dir
        .clone()
        .or(app.storage.and_then(|s| non_blank(s.dir)))
        .map(PathBuf::from)
        .unwrap_or(defaults.data_dir);

    Ok(RuntimeSettings {
        provider,
        openai_base_url,
        api_key: non_blank(openai.api_key),
        streaming: app.streaming.unwrap_or(defaults.streaming),
        system_prompt: non_blank(app.system_prompt).unwrap_or(defaults.system_prompt),
        imagekit,
        server_addr,
        relay_endpoint: non_blank(server.relay_endpoint),
        data_dir,
    })
}

fn resolve_imagekit(
    section: ImageKitSection,
    env: &EnvOverrides,
) -> Result<Option<ImageKitSettings>, ConfigError> {
    let public_key = env
        .imagekit_public_key
        .clone()
        .or(non_blank(section.public_key));
    let private_key = env
        .imagekit_private_key
        .clone()
        .or(non_blank(section.private_key));
    let url_endpoint = env
        .imagekit_url_endpoint
        .clone()
        .or(non_blank(section.url_endpoint));

    match (public_key, private_key, url_endpoint) {
        (None, None, None) => Ok(None),
        (Some(public_key), Some(private_key), Some(url_endpoint)) => Ok(Some(ImageKitSettings {
            public_key,
            private_key,
            url_endpoint,
            folder: non_blank(section.folder).unwrap_or_else(|| DEFAULT_IMAGE_FOLDER.to_string()),
        })),
        _ => Err(ConfigError::Invalid(
            "ImageKit needs public_key, private_key and url_endpoint together".to_string(),
        )),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn locate_config_file() -> Option<PathBuf> {
    parley_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn parley_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("parley");
        paths.push(config_dir.join("parley.yaml"));
        paths.push(config_dir.join("parley.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".parley").join("parley.yaml"));
        paths.push(home_dir.join(".parley").join("parley.yml"));
    } else {
        paths.push(PathBuf::from("parley.yaml"));
        paths.push(PathBuf::from("parley.yml"));
    }
    paths
}

fn default_data_dir() -> PathBuf {
    match BaseDirs::new() {
        Some(base) => base.data_dir().join("parley"),
        None => PathBuf::from(".parley"),
    }
}

#[derive(Debug, Deserialize)]
struct ParleyConfig {
    app: Option<AppSection>,
}

#[derive(Debug, Default, Deserialize)]
struct AppSection {
    provider: Option<String>,
    streaming: Option<bool>,
    system_prompt: Option<String>,
    openai: Option<OpenAiSection>,
    imagekit: Option<ImageKitSection>,
    server: Option<ServerSection>,
    storage: Option<StorageSection>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiSection {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageKitSection {
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    url_endpoint: Option<String>,
    #[serde(default)]
    folder: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    #[serde(default)]
    addr: Option<String>,
    #[serde(default)]
    relay_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    #[serde(default)]
    dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> AppSection {
        serde_yaml::from_str::<ParleyConfig>(yaml)
            .expect("yaml")
            .app
            .unwrap_or_default()
    }

    #[test]
    fn empty_config_resolves_to_defaults() {
        let settings =
            resolve_app_settings(AppSection::default(), &EnvOverrides::default()).expect("defaults");
        assert_eq!(settings.provider, LlmProviderKind::OpenAi);
        assert_eq!(settings.openai_base_url, DEFAULT_OPENAI_BASE_URL);
        assert!(settings.streaming);
        assert!(settings.imagekit.is_none());
        assert_eq!(settings.server_addr.to_string(), DEFAULT_SERVER_ADDR);
        assert_eq!(settings.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn resolves_full_config() {
        let app = parse(
            r#"
app:
  provider: mock
  streaming: false
  system_prompt: "Answer in haiku."
  openai:
    api_key: " sk-file "
    base_url: http://localhost:8080/v1
  imagekit:
    public_key: pub
    private_key: priv
    url_endpoint: https://ik.imagekit.io/demo
  server:
    addr: 0.0.0.0:8088
    relay_endpoint: http://localhost:8088/api/images/upload
  storage:
    dir: /tmp/parley-data
"#,
        );
        let settings = resolve_app_settings(app, &EnvOverrides::default()).expect("settings");
        assert_eq!(settings.provider, LlmProviderKind::Mock);
        assert!(!settings.streaming);
        assert_eq!(settings.system_prompt, "Answer in haiku.");
        assert_eq!(settings.api_key.as_deref(), Some("sk-file"));
        assert_eq!(settings.openai_base_url, "http://localhost:8080/v1");
        let imagekit = settings.imagekit.expect("imagekit");
        assert_eq!(imagekit.private_key, "priv");
        assert_eq!(imagekit.folder, DEFAULT_IMAGE_FOLDER);
        assert_eq!(settings.server_addr.port(), 8088);
        assert_eq!(
            settings.relay_endpoint.as_deref(),
            Some("http://localhost:8088/api/images/upload")
        );
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/parley-data"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let app = parse("app:\n  provider: openai\n  imagekit:\n    folder: shots\n");
        let env = EnvOverrides {
            provider: Some("mock".into()),
            imagekit_public_key: Some("pub".into()),
            imagekit_private_key: Some("priv".into()),
            imagekit_url_endpoint: Some("https://ik.imagekit.io/x".into()),
            server_addr: Some("127.0.0.1:9999".into()),
            ..EnvOverrides::default()
        };
        let settings = resolve_app_settings(app, &env).expect("settings");
        assert_eq!(settings.provider, LlmProviderKind::Mock);
        assert_eq!(settings.imagekit.expect("imagekit").folder, "shots");
        assert_eq!(settings.server_addr.port(), 9999);
    }

    #[test]
    fn partial_imagekit_is_rejected() {
        let app = parse("app:\n  imagekit:\n    public_key: pub\n");
        let err = resolve_app_settings(app, &EnvOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.user_message().contains("parley.yaml"));
    }

    #[test]
    fn errors_on_unknown_provider_and_bad_addr() {
        let app = parse("app:\n  provider: azure\n");
        assert!(resolve_app_settings(app, &EnvOverrides::default()).is_err());
        let app = parse("app:\n  server:\n    addr: nowhere\n");
        assert!(resolve_app_settings(app, &EnvOverrides::default()).is_err());
    }
}
