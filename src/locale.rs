//! Locales used to resolve localized event messages.

use crate::error::{EventLogError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A supported message locale.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locale {
    code: &'static str,
    description: &'static str,
    lang_id: u16,
}

const fn locale(lang_id: u16, code: &'static str, description: &'static str) -> Locale {
    Locale {
        code,
        description,
        lang_id,
    }
}

/// The locale used when none is selected.
pub const NEUTRAL: Locale = locale(0x0000, "neutral", "Default");

static LOCALES: &[Locale] = &[
    locale(0x0402, "bg_BG", "Bulgarian"),
    locale(0x0804, "zh_CN", "Simplified Chinese"),
    locale(0x0404, "zh_TW", "Traditional Chinese"),
    locale(0x0C04, "zh_HK", "Chinese (Hong Kong)"),
    locale(0x1004, "zh_SG", "Chinese (Singapore)"),
    locale(0x041A, "hr_HR", "Croatian"),
    locale(0x0405, "cs_CZ", "Czech"),
    locale(0x0406, "da_DK", "Danish"),
    locale(0x0413, "nl_NL", "Dutch"),
    locale(0x0813, "nl_BE", "Dutch (Belgium)"),
    locale(0x0409, "en_US", "English (United States)"),
    locale(0x0809, "en_GB", "English (UK)"),
    locale(0x0C09, "en_AU", "English (Australia)"),
    locale(0x1009, "en_CA", "English (Canada)"),
    locale(0x1409, "en_NZ", "English (New Zealand)"),
    locale(0x1809, "en_IE", "English (Ireland)"),
    locale(0x040B, "fi_FI", "Finnish"),
    locale(0x040C, "fr_FR", "French"),
    locale(0x080C, "fr_BE", "French (Belgium)"),
    locale(0x0C0C, "fr_CA", "French (Canada)"),
    locale(0x100C, "fr_CH", "French (Swiss)"),
    locale(0x0407, "de_DE", "German"),
    locale(0x0807, "de_CH", "German (Swiss)"),
    locale(0x0C07, "de_AT", "German (Austria)"),
    locale(0x0408, "el_GR", "Greek (Ελληνικά)"),
    locale(0x040E, "hu_HU", "Hungarian"),
    locale(0x040F, "is_IS", "Icelandic"),
    locale(0x0410, "it_IT", "Italian (Italy)"),
    locale(0x0810, "it_CH", "Italian (Swiss)"),
    locale(0x0411, "ja_JP", "Japanese"),
    locale(0x0412, "ko_KO", "Korean"),
    locale(0x0414, "no_NO", "Norwegian (Bokmål)"),
    locale(0x0414, "nb_NO", "Norwegian (Bokmål)"),
    locale(0x0814, "nn_NO", "Norwegian (Nynorsk)"),
    locale(0x0415, "pl_PL", "Polish"),
    locale(0x0816, "pt_PT", "Portuguese"),
    locale(0x0416, "pt_BR", "Portuguese (Brazil)"),
    locale(0x0418, "ro_RO", "Romanian"),
    locale(0x0419, "ru_RU", "Russian (русский язык)"),
    locale(0x041B, "sk_SK", "Slovak"),
    locale(0x0424, "sl_SI", "Slovenian"),
    locale(0x040A, "es_ES", "Spanish"),
    locale(0x040A, "es_ES_T", "Spanish (Traditional)"),
    locale(0x080A, "es_MX", "Spanish (Mexico)"),
    locale(0x0C0A, "es_ES_M", "Spanish (Modern)"),
    locale(0x041D, "sv_SE", "Swedish"),
    locale(0x041F, "tr_TR", "Turkish"),
];

impl Locale {
    /// Look up a locale by code, ignoring ASCII case.
    ///
    /// `"neutral"` resolves to [`NEUTRAL`].
    pub fn lookup(code: &str) -> Result<Locale> {
        if code.eq_ignore_ascii_case(NEUTRAL.code) {
            return Ok(NEUTRAL);
        }
        LOCALES
            .iter()
            .find(|l| l.code.eq_ignore_ascii_case(code))
            .copied()
            .ok_or_else(|| EventLogError::invalid_argument(format!("Unknown locale: {}", code)))
    }

    /// All supported locales (excluding the neutral default).
    pub fn all() -> impl Iterator<Item = Locale> {
        LOCALES.iter().copied()
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    /// Windows-style language identifier (primary | sublanguage << 10).
    pub fn lang_id(&self) -> u16 {
        self.lang_id
    }

    pub fn is_neutral(&self) -> bool {
        self.lang_id == NEUTRAL.lang_id
    }
}

impl Default for Locale {
    fn default() -> Self {
        NEUTRAL
    }
}

impl fmt::Debug for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locale({})", self.code)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code)
    }
}

impl std::str::FromStr for Locale {
    type Err = EventLogError;

    fn from_str(s: &str) -> Result<Self> {
        Locale::lookup(s)
    }
}

impl Serialize for Locale {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code)
    }
}

impl<'de> Deserialize<'de> for Locale {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Locale::lookup(&code).map_err(serde::de::Error::custom)
    }
}
