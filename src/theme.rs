use std::fs;
use std::io;
use std::path::Path;

use ratatui::style::Color;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct Theme {
    pub agents_bg: Color,
    pub output_bg: Color,
    pub chat_bg: Color,
    pub input_bg: Color,
    pub status_bg: Color,
    pub text_fg: Color,
    pub muted_fg: Color,
    pub active_fg: Color,
    pub user_fg: Color,
    pub agent_fg: Color,
    pub stderr_fg: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            agents_bg: Color::Rgb(44, 44, 44),
            output_bg: Color::Rgb(40, 40, 40),
            chat_bg: Color::Rgb(54, 54, 54),
            input_bg: Color::Rgb(62, 62, 62),
            status_bg: Color::Rgb(36, 36, 36),
            text_fg: Color::Rgb(225, 225, 225),
            muted_fg: Color::Rgb(185, 185, 185),
            active_fg: Color::Rgb(255, 255, 255),
            user_fg: Color::Rgb(80, 190, 100),
            agent_fg: Color::Rgb(230, 150, 60),
            stderr_fg: Color::Rgb(220, 110, 110),
        }
    }
}

impl Theme {
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path_ref = path.as_ref();
        match fs::read_to_string(path_ref) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(theme) => theme,
                Err(err) => {
                    tracing::warn!(
                        path = %path_ref.display(),
                        "failed to parse theme file, using defaults: {err}"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!(
                    path = %path_ref.display(),
                    "failed to read theme file, using defaults: {err}"
                );
                Self::default()
            }
        }
    }

    /// Colours missing from the file keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        let cfg: ThemeToml = toml::from_str(s)?;
        let colors = cfg.colors;
        let base = Self::default();
        let pick = |value: Option<RgbToml>, fallback: Color| value.map_or(fallback, RgbToml::to_color);
        Ok(Self {
            agents_bg: pick(colors.agents_bg, base.agents_bg),
            output_bg: pick(colors.output_bg, base.output_bg),
            chat_bg: pick(colors.chat_bg, base.chat_bg),
            input_bg: pick(colors.input_bg, base.input_bg),
            status_bg: pick(colors.status_bg, base.status_bg),
            text_fg: pick(colors.text_fg, base.text_fg),
            muted_fg: pick(colors.muted_fg, base.muted_fg),
            active_fg: pick(colors.active_fg, base.active_fg),
            user_fg: pick(colors.user_fg, base.user_fg),
            agent_fg: pick(colors.agent_fg, base.agent_fg),
            stderr_fg: pick(colors.stderr_fg, base.stderr_fg),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThemeToml {
    colors: ThemeColorsToml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThemeColorsToml {
    agents_bg: Option<RgbToml>,
    output_bg: Option<RgbToml>,
    chat_bg: Option<RgbToml>,
    input_bg: Option<RgbToml>,
    status_bg: Option<RgbToml>,
    text_fg: Option<RgbToml>,
    muted_fg: Option<RgbToml>,
    active_fg: Option<RgbToml>,
    user_fg: Option<RgbToml>,
    agent_fg: Option<RgbToml>,
    stderr_fg: Option<RgbToml>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct RgbToml {
    r: u8,
    g: u8,
    b: u8,
}

impl RgbToml {
    fn to_color(self) -> Color {
        Color::Rgb(self.r, self.g, self.b)
    }
}
