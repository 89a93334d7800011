use crate::events::{GroupState, LayoutSet};
use parking_lot::RwLock;
use std::sync::Arc;

/// Карта клавиатуры, построенная по текущему состоянию устройства на сервере
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardMap {
    pub device_id: u8,
    pub min_key_code: u8,
    pub max_key_code: u8,
    pub layouts: LayoutSet,
    pub symbols_name: String,
}

/// Связка карта + состояние. Всегда полностью построена
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardBinding {
    pub map: KeyboardMap,
    pub state: GroupState,
}

impl KeyboardBinding {
    pub fn new(map: KeyboardMap, state: GroupState) -> Self {
        Self { map, state }
    }

    pub fn group(&self) -> usize {
        self.state.group as usize
    }
}

/// Слот с текущей связкой.
///
/// Читатели получают `Arc` на целиком построенную связку; пересборка заменяет
/// её одной операцией, так что промежуточное состояние никогда не видно.
#[derive(Debug, Default)]
pub struct KeyboardSlot {
    current: RwLock<Arc<KeyboardBinding>>,
}

impl KeyboardSlot {
    pub fn new(binding: KeyboardBinding) -> Self {
        Self {
            current: RwLock::new(Arc::new(binding)),
        }
    }

    pub fn current(&self) -> Arc<KeyboardBinding> {
        self.current.read().clone()
    }

    /// Заменить связку на новую, вернуть старую
    pub fn swap(&self, binding: KeyboardBinding) -> Arc<KeyboardBinding> {
        std::mem::replace(&mut *self.current.write(), Arc::new(binding))
    }

    pub fn update_state(&self, state: GroupState) {
        let mut current = self.current.write();
        if current.state != state {
            let mut updated = (**current).clone();
            updated.state = state;
            *current = Arc::new(updated);
        }
    }
}
