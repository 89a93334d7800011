use serde::{Deserialize, Serialize};
use std::fmt;

/// Идентификатор окна X11
pub type WindowId = u32;

/// Идентичность приложения из свойства WM_CLASS: (instance, class)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationIdentity {
    pub instance: String,
    pub class: String,
}

impl ApplicationIdentity {
    pub fn new(instance: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            class: class.into(),
        }
    }

    /// Разобрать сырое значение WM_CLASS: строки, разделённые NUL
    pub fn from_wm_class(raw: &[u8]) -> Self {
        let raw = raw.strip_suffix(&[0]).unwrap_or(raw);
        if raw.is_empty() {
            return Self::default();
        }

        let parts: Vec<String> = raw
            .split(|b| *b == 0)
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect();

        // Как и в исходном списке строк: первая - instance, последняя - class
        match (parts.first(), parts.last()) {
            (Some(instance), Some(class)) => Self::new(instance.clone(), class.clone()),
            _ => Self::default(),
        }
    }

    /// Пустая идентичность означает "идентичность недоступна"
    pub fn is_empty(&self) -> bool {
        self.instance.is_empty() && self.class.is_empty()
    }
}

impl fmt::Display for ApplicationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance, self.class)
    }
}

/// Какие события сервер должен присылать для окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowEventMask {
    /// Никаких событий (на время собственной записи заголовка)
    Disabled,
    /// Изменения свойств окна
    PropertyChange,
}
