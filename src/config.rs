use crate::events::{ApplicationIdentity, PolicyState};
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const TITLE_PLACEHOLDER: &str = "%{title}";
pub const LABEL_PLACEHOLDER: &str = "%{label}";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub connection: ConnectionConfig,
    pub title: TitleConfig,
    pub notify: NotifyConfig,
    pub windows: WindowsConfig,
    // Оптимизационный индекс - не сериализуется, строится после загрузки
    #[serde(skip)]
    skip_set_lower: HashSet<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Имя дисплея X11, "auto" - взять из $DISPLAY
    pub display: String,
    pub poll_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TitleConfig {
    pub rewrite: bool,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    /// Звуковой сигнал при смене раскладки
    pub announce: bool,
    /// Иконка-картинка вместо текста; ядру безразлично, передаётся наблюдателю
    pub picture_mode: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowsConfig {
    /// Instance-классы приложений, которые не трогаем (без учёта регистра)
    pub skip_list: Vec<String>,
    /// Сохранённые записи реестра, загружаются при старте
    #[serde(default)]
    pub presets: Vec<RegistryRecord>,
}

/// Плоская запись реестра для внешнего слоя хранения
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegistryRecord {
    pub instance: String,
    pub class: String,
    pub layout: usize,
    #[serde(default)]
    pub policy: PolicyState,
    /// Имя раскладки на момент снимка; при загрузке не используется
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl RegistryRecord {
    pub fn identity(&self) -> ApplicationIdentity {
        ApplicationIdentity::new(self.instance.clone(), self.class.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut config = Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "full".to_string(),
                filter: "layout_keeper=info".to_string(),
            },
            connection: ConnectionConfig {
                display: "auto".to_string(),
                poll_interval_ms: 20,
                shutdown_timeout_ms: 1000,
            },
            title: TitleConfig {
                rewrite: false,
                format: format!("{}: {}", LABEL_PLACEHOLDER, TITLE_PLACEHOLDER),
            },
            notify: NotifyConfig {
                announce: false,
                picture_mode: false,
            },
            windows: WindowsConfig {
                skip_list: Vec::new(),
                presets: Vec::new(),
            },
            skip_set_lower: HashSet::new(),
        };
        config.build_optimization_indexes();
        config
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("LK_").split("__"));

        let mut config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;
        config.build_optimization_indexes();

        Ok(config)
    }

    /// Строит оптимизационные индексы для быстрого поиска
    pub fn build_optimization_indexes(&mut self) {
        self.skip_set_lower = self
            .windows
            .skip_list
            .iter()
            .map(|instance| instance.to_lowercase())
            .collect();
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "full" | "compact" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        // Валидация настроек соединения
        if self.connection.display.is_empty() {
            anyhow::bail!("connection.display не может быть пустым (используйте \"auto\")");
        }

        if !(1..=1000).contains(&self.connection.poll_interval_ms) {
            anyhow::bail!(
                "poll_interval_ms должно быть в диапазоне 1..=1000, получено {}",
                self.connection.poll_interval_ms
            );
        }

        if self.connection.shutdown_timeout_ms == 0 {
            anyhow::bail!("shutdown_timeout_ms должно быть больше 0");
        }

        // Валидация шаблона заголовка
        if self.title.format.trim().is_empty() {
            anyhow::bail!("Пустой шаблон заголовка title.format");
        }

        // Валидация сохранённых записей
        for (i, record) in self.windows.presets.iter().enumerate() {
            if record.instance.is_empty() && record.class.is_empty() {
                anyhow::bail!("Пустая идентичность приложения в записи #{}", i + 1);
            }
        }

        Ok(())
    }

    /// Пропускать ли приложение (сравнение instance-класса без учёта регистра)
    pub fn is_skipped(&self, identity: &ApplicationIdentity) -> bool {
        if self.skip_set_lower.is_empty() {
            return false;
        }
        self.skip_set_lower
            .contains(&identity.instance.to_lowercase())
    }
}

impl TitleConfig {
    /// Собрать заголовок окна по шаблону с %{title} и %{label}
    pub fn compose(&self, title: &str, label: &str) -> String {
        self.format
            .replace(LABEL_PLACEHOLDER, label)
            .replace(TITLE_PLACEHOLDER, title)
    }
}
