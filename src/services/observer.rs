use crate::config::NotifyConfig;
use tracing::info;

/// Внешние побочные эффекты арбитра: иконка, звук, перерисовка списка раскладок
pub trait LayoutObserver: Send {
    fn on_layout_icon_changed(&mut self, index: usize);
    fn on_announce(&mut self);
    fn on_layout_names_changed(&mut self, names: &[String]);
}

/// Наблюдатель по умолчанию: только пишет в лог.
/// Отрисовка иконок и звук живут вне ядра.
pub struct TracingObserver {
    picture_mode: bool,
    names: Vec<String>,
}

impl TracingObserver {
    pub fn new(notify: &NotifyConfig) -> Self {
        Self {
            picture_mode: notify.picture_mode,
            names: Vec::new(),
        }
    }
}

impl LayoutObserver for TracingObserver {
    fn on_layout_icon_changed(&mut self, index: usize) {
        let name = self.names.get(index).map(String::as_str).unwrap_or("?");
        let mode = if self.picture_mode { "picture" } else { "text" };
        info!("Иконка раскладки: #{} {} ({})", index, name, mode);
    }

    fn on_announce(&mut self) {
        info!("Сигнал смены раскладки");
    }

    fn on_layout_names_changed(&mut self, names: &[String]) {
        info!("Список раскладок обновлён: {:?}", names);
        self.names = names.to_vec();
    }
}
