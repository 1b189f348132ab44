//! Settings command: print or update user preferences

use anyhow::Result;
use std::path::Path;

use crate::config::{Config, FontSize, Theme, TreeViewMode};
use crate::locale::Locale;

#[derive(Debug, Default)]
pub struct SettingsUpdate {
    pub locale: Option<Locale>,
    pub theme: Option<Theme>,
    pub font_size: Option<FontSize>,
    pub tree_view_mode: Option<TreeViewMode>,
    pub debug_mode: Option<bool>,
}

impl SettingsUpdate {
    fn is_empty(&self) -> bool {
        self.locale.is_none()
            && self.theme.is_none()
            && self.font_size.is_none()
            && self.tree_view_mode.is_none()
            && self.debug_mode.is_none()
    }

    fn apply(self, config: &mut Config) {
        let settings = &mut config.settings;
        if let Some(locale) = self.locale {
            settings.locale = locale;
        }
        if let Some(theme) = self.theme {
            settings.theme = theme;
        }
        if let Some(font_size) = self.font_size {
            settings.font_size = font_size;
        }
        if let Some(mode) = self.tree_view_mode {
            settings.tree_view_mode = mode;
        }
        if let Some(debug) = self.debug_mode {
            settings.debug_mode = debug;
        }
    }
}

pub fn run(mut config: Config, config_path: &Path, update: SettingsUpdate) -> Result<()> {
    if !update.is_empty() {
        update.apply(&mut config);
        config.save(config_path)?;
        println!("Settings saved to {}", config_path.display());
    }

    let s = &config.settings;
    println!("{:<16} {} ({})", "locale", s.locale, s.locale.display_name());
    println!("{:<16} {:?}", "theme", s.theme);
    println!("{:<16} {:?}", "font_size", s.font_size);
    println!("{:<16} {:?}", "tree_view_mode", s.tree_view_mode);
    println!("{:<16} {}", "debug_mode", s.debug_mode);
    println!("{:<16} {}", "model", config.completion.model);
    println!("{:<16} {}", "database", config.database_path().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_touches_only_given_fields() {
        let mut config = Config::default();
        SettingsUpdate {
            locale: Some(Locale::En),
            debug_mode: Some(true),
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.settings.locale, Locale::En);
        assert!(config.settings.debug_mode);
        assert_eq!(config.settings.theme, Theme::Auto);
        assert!(SettingsUpdate::default().is_empty());
    }
}
