use crate::error::{KeeperError, Result};
use tracing::{debug, info};

pub struct DisplayFinder;

impl DisplayFinder {
    /// Найти дисплей X11 для подключения
    pub fn find_display(requested: &str) -> Result<String> {
        if requested != "auto" {
            return if Self::is_valid_display_name(requested) {
                info!("Используется указанный дисплей: {}", requested);
                Ok(requested.to_string())
            } else {
                KeeperError::invalid_display(format!("Некорректное имя дисплея: {:?}", requested))
            };
        }

        // Автопоиск через окружение
        Self::from_env(std::env::var("DISPLAY").ok())
    }

    fn from_env(value: Option<String>) -> Result<String> {
        match value {
            Some(name) if Self::is_valid_display_name(&name) => {
                debug!("Дисплей из $DISPLAY: {}", name);
                Ok(name)
            }
            Some(name) => KeeperError::invalid_display(format!(
                "Переменная DISPLAY содержит некорректное значение: {:?}",
                name
            )),
            None => KeeperError::invalid_display(
                "Переменная DISPLAY не задана. Запустите программу внутри X11 сессии",
            ),
        }
    }

    /// Формат [host]:display[.screen]
    fn is_valid_display_name(name: &str) -> bool {
        let Some((_, rest)) = name.rsplit_once(':') else {
            return false;
        };
        let number = rest.split('.').next().unwrap_or("");
        !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
    }
}
