use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Политика приложения относительно раскладки
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyState {
    /// Запоминаем последнюю выбранную раскладку
    #[default]
    Normal,
    /// Как Normal, но с озвучкой каждой смены раскладки
    #[serde(rename = "first")]
    FirstLock,
    /// Раскладка зафиксирована, внешние смены откатываются
    #[serde(rename = "fixed")]
    FixedLock,
}

impl PolicyState {
    /// Следующее состояние в цикле Normal -> FirstLock -> FixedLock -> Normal
    pub fn next(self) -> Self {
        match self {
            PolicyState::Normal => PolicyState::FirstLock,
            PolicyState::FirstLock => PolicyState::FixedLock,
            PolicyState::FixedLock => PolicyState::Normal,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PolicyState::Normal => "normal",
            PolicyState::FirstLock => "first",
            PolicyState::FixedLock => "fixed",
        }
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PolicyState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(PolicyState::Normal),
            "first" => Ok(PolicyState::FirstLock),
            "fixed" => Ok(PolicyState::FixedLock),
            other => Err(format!("Неизвестная политика: {}", other)),
        }
    }
}

/// Цель запроса смены раскладки
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutTarget {
    Index(usize),
    Next,
}

impl LayoutTarget {
    /// Вычислить итоговый индекс группы; None если раскладок нет
    pub fn resolve(self, current: usize, layout_count: usize) -> Option<usize> {
        if layout_count == 0 {
            return None;
        }

        match self {
            LayoutTarget::Index(index) => Some(index),
            LayoutTarget::Next => Some((current + 1) % layout_count),
        }
    }
}

impl fmt::Display for LayoutTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutTarget::Index(index) => write!(f, "#{}", index),
            LayoutTarget::Next => write!(f, "next"),
        }
    }
}

/// Упорядоченный список имён раскладок (групп XKB)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSet {
    names: Vec<String>,
}

impl LayoutSet {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Индекс, сохранённый до перечитывания раскладок, может оказаться вне диапазона
    pub fn clamp(&self, index: usize) -> usize {
        if index < self.names.len() {
            index
        } else {
            0
        }
    }
}

impl fmt::Display for LayoutSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names.join(", "))
    }
}

/// Состояние модификаторов и групп из StateNotify / GetState
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupState {
    pub base_mods: u16,
    pub latched_mods: u16,
    pub locked_mods: u16,
    pub base_group: i16,
    pub latched_group: i16,
    pub locked_group: u8,
    pub group: u8,
}

/// Причина инвалидации карты клавиатуры
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapInvalidation {
    /// XkbMapNotify
    MapChanged,
    /// XkbNewKeyboardNotify с изменением keycodes
    NewKeyboard { device_id: u8 },
}

impl fmt::Display for MapInvalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapInvalidation::MapChanged => write!(f, "map-notify"),
            MapInvalidation::NewKeyboard { device_id } => {
                write!(f, "new-keyboard (device {})", device_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_cycle() {
        assert_eq!(PolicyState::Normal.next(), PolicyState::FirstLock);
        assert_eq!(PolicyState::FirstLock.next(), PolicyState::FixedLock);
        assert_eq!(PolicyState::FixedLock.next(), PolicyState::Normal);
    }

    #[test]
    fn test_policy_labels() {
        for policy in [PolicyState::Normal, PolicyState::FirstLock, PolicyState::FixedLock] {
            assert_eq!(policy.label().parse::<PolicyState>(), Ok(policy));
        }
        assert!("locked".parse::<PolicyState>().is_err());
    }

    #[test]
    fn test_next_layout_wraps() {
        assert_eq!(LayoutTarget::Next.resolve(2, 3), Some(0));
        assert_eq!(LayoutTarget::Next.resolve(0, 3), Some(1));
        assert_eq!(LayoutTarget::Index(1).resolve(0, 3), Some(1));
        assert_eq!(LayoutTarget::Next.resolve(0, 0), None);
    }

    #[test]
    fn test_layout_set_clamp() {
        let set = LayoutSet::new(vec!["us".to_string(), "ru".to_string()]);
        assert_eq!(set.clamp(1), 1);
        assert_eq!(set.clamp(2), 0);
        assert_eq!(set.name(1), Some("ru"));
        assert_eq!(set.name(5), None);
        assert_eq!(set.to_string(), "[us, ru]");
    }
}
