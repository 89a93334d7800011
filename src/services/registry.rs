use crate::events::{ApplicationIdentity, PolicyState};
use indexmap::IndexMap;

/// Запись реестра для одного приложения
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub identity: ApplicationIdentity,
    /// Имеет смысл только относительно набора раскладок на момент записи
    pub layout: usize,
    pub policy: PolicyState,
    /// Исходный заголовок окна на время сессии фокуса
    pub saved_title: Option<String>,
}

/// Реестр раскладок по приложениям.
///
/// Только память, без ввода-вывода. Мутации выполняются из одного контекста
/// (того же, где работает LayoutArbiter), поэтому блокировок нет.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    entries: IndexMap<ApplicationIdentity, RegistryEntry>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, identity: &ApplicationIdentity) -> Option<&RegistryEntry> {
        self.entries.get(identity)
    }

    /// Создать запись или обновить раскладку и политику существующей
    pub fn upsert(
        &mut self,
        identity: &ApplicationIdentity,
        layout: usize,
        policy: PolicyState,
    ) -> &RegistryEntry {
        let entry = self
            .entries
            .entry(identity.clone())
            .or_insert_with(|| RegistryEntry {
                identity: identity.clone(),
                layout,
                policy,
                saved_title: None,
            });
        entry.layout = layout;
        entry.policy = policy;
        entry
    }

    /// Обновить только раскладку, политика и заголовок сохраняются
    pub fn set_layout(&mut self, identity: &ApplicationIdentity, layout: usize) {
        if let Some(entry) = self.entries.get_mut(identity) {
            entry.layout = layout;
        }
    }

    pub fn set_policy(&mut self, identity: &ApplicationIdentity, policy: PolicyState) {
        if let Some(entry) = self.entries.get_mut(identity) {
            entry.policy = policy;
        }
    }

    /// Перевести политику на следующий шаг цикла, вернуть новое значение
    pub fn cycle_policy(&mut self, identity: &ApplicationIdentity) -> Option<PolicyState> {
        let next = self.entries.get(identity)?.policy.next();
        self.set_policy(identity, next);
        Some(next)
    }

    pub fn set_saved_title(&mut self, identity: &ApplicationIdentity, title: &str) {
        if let Some(entry) = self.entries.get_mut(identity) {
            entry.saved_title = Some(title.to_string());
        }
    }

    pub fn clear_saved_title(&mut self, identity: &ApplicationIdentity) -> Option<String> {
        self.entries
            .get_mut(identity)
            .and_then(|entry| entry.saved_title.take())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Записи в порядке появления
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term() -> ApplicationIdentity {
        ApplicationIdentity::new("Term", "xterm")
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut registry = WindowRegistry::new();
        registry.upsert(&term(), 1, PolicyState::Normal);
        registry.upsert(&term(), 1, PolicyState::Normal);

        assert_eq!(registry.len(), 1);
        let entry = registry.find(&term()).unwrap();
        assert_eq!(entry.layout, 1);
        assert_eq!(entry.policy, PolicyState::Normal);
    }

    #[test]
    fn test_identity_is_case_sensitive() {
        let mut registry = WindowRegistry::new();
        registry.upsert(&term(), 0, PolicyState::Normal);
        registry.upsert(&ApplicationIdentity::new("term", "xterm"), 1, PolicyState::Normal);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_upsert_keeps_saved_title() {
        let mut registry = WindowRegistry::new();
        registry.upsert(&term(), 0, PolicyState::Normal);
        registry.set_saved_title(&term(), "session1");
        registry.upsert(&term(), 2, PolicyState::FixedLock);

        let entry = registry.find(&term()).unwrap();
        assert_eq!(entry.layout, 2);
        assert_eq!(entry.policy, PolicyState::FixedLock);
        assert_eq!(entry.saved_title.as_deref(), Some("session1"));
    }

    #[test]
    fn test_saved_title_slot() {
        let mut registry = WindowRegistry::new();
        registry.upsert(&term(), 0, PolicyState::Normal);
        registry.set_saved_title(&term(), "session1");

        assert_eq!(registry.clear_saved_title(&term()).as_deref(), Some("session1"));
        assert_eq!(registry.clear_saved_title(&term()), None);
    }

    #[test]
    fn test_cycle_policy() {
        let mut registry = WindowRegistry::new();
        assert_eq!(registry.cycle_policy(&term()), None);

        registry.upsert(&term(), 0, PolicyState::Normal);
        assert_eq!(registry.cycle_policy(&term()), Some(PolicyState::FirstLock));
        assert_eq!(registry.cycle_policy(&term()), Some(PolicyState::FixedLock));
        assert_eq!(registry.cycle_policy(&term()), Some(PolicyState::Normal));
    }

    #[test]
    fn test_mutations_on_missing_entry_are_noops() {
        let mut registry = WindowRegistry::new();
        registry.set_layout(&term(), 3);
        registry.set_policy(&term(), PolicyState::FixedLock);
        registry.set_saved_title(&term(), "x");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_iteration_order_is_insertion_order() {
        let mut registry = WindowRegistry::new();
        registry.upsert(&ApplicationIdentity::new("b", "B"), 0, PolicyState::Normal);
        registry.upsert(&ApplicationIdentity::new("a", "A"), 1, PolicyState::Normal);

        let order: Vec<&str> = registry.iter().map(|e| e.identity.instance.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
    }
}
