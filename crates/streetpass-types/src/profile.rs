//! Avatar profile owned by the local device.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, TypesError, MAX_DISPLAY_NAME_CHARS};

/// Default skin tone.
pub const DEFAULT_SKIN_COLOR: &str = "#E0AC69";

/// Default hair color.
pub const DEFAULT_HAIR_COLOR: &str = "#3D2314";

/// A `#RRGGBB` color.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    pub fn parse(raw: &str) -> Result<Self> {
        let digits = raw
            .strip_prefix('#')
            .ok_or_else(|| TypesError::InvalidColor(raw.to_string()))?;
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypesError::InvalidColor(raw.to_string()));
        }
        Ok(Self(raw.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Color {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.0
    }
}

/// Hair style, stored as its index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum HairStyle {
    #[default]
    Short = 0,
    Medium = 1,
    Long = 2,
    Curly = 3,
    Bald = 4,
}

impl HairStyle {
    pub const ALL: [HairStyle; 5] = [
        HairStyle::Short,
        HairStyle::Medium,
        HairStyle::Long,
        HairStyle::Curly,
        HairStyle::Bald,
    ];

    pub fn label(self) -> &'static str {
        match self {
            HairStyle::Short => "Short",
            HairStyle::Medium => "Medium",
            HairStyle::Long => "Long",
            HairStyle::Curly => "Curly",
            HairStyle::Bald => "Bald",
        }
    }

    /// The next style, wrapping around.
    pub fn cycle(self) -> Self {
        Self::ALL[(self as usize + 1) % Self::ALL.len()]
    }
}

impl TryFrom<u8> for HairStyle {
    type Error = TypesError;

    fn try_from(index: u8) -> Result<Self> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or(TypesError::UnknownHairStyle(index))
    }
}

impl From<HairStyle> for u8 {
    fn from(style: HairStyle) -> Self {
        style as u8
    }
}

/// Accessory, stored as its index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Accessory {
    #[default]
    None = 0,
    Glasses = 1,
    Hat = 2,
    Headphones = 3,
    Mask = 4,
}

impl Accessory {
    pub const ALL: [Accessory; 5] = [
        Accessory::None,
        Accessory::Glasses,
        Accessory::Hat,
        Accessory::Headphones,
        Accessory::Mask,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Accessory::None => "None",
            Accessory::Glasses => "Glasses",
            Accessory::Hat => "Hat",
            Accessory::Headphones => "Headphones",
            Accessory::Mask => "Mask",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Accessory::None => "",
            Accessory::Glasses => "👓",
            Accessory::Hat => "🧢",
            Accessory::Headphones => "🎧",
            Accessory::Mask => "😷",
        }
    }

    pub fn cycle(self) -> Self {
        Self::ALL[(self as usize + 1) % Self::ALL.len()]
    }
}

impl TryFrom<u8> for Accessory {
    type Error = TypesError;

    fn try_from(index: u8) -> Result<Self> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or(TypesError::UnknownAccessory(index))
    }
}

impl From<Accessory> for u8 {
    fn from(accessory: Accessory) -> Self {
        accessory as u8
    }
}

/// The avatar profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Display name, at most 20 characters. May be empty.
    #[serde(rename = "name", default)]
    pub display_name: String,
    #[ts(type = "string")]
    pub skin_color: Color,
    #[ts(type = "number")]
    #[serde(default)]
    pub hair_style: HairStyle,
    #[ts(type = "string")]
    pub hair_color: Color,
    #[ts(type = "number")]
    #[serde(default)]
    pub accessory: Accessory,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<u64>,
}

impl Profile {
    /// The profile a new device starts with.
    pub fn new_default(now: u64) -> Self {
        Self {
            display_name: String::new(),
            skin_color: Color(DEFAULT_SKIN_COLOR.to_string()),
            hair_style: HairStyle::Short,
            hair_color: Color(DEFAULT_HAIR_COLOR.to_string()),
            accessory: Accessory::None,
            created_at: now,
            last_updated: None,
        }
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let len = self.display_name.chars().count();
        if len > MAX_DISPLAY_NAME_CHARS {
            return Err(TypesError::NameTooLong {
                len,
                max: MAX_DISPLAY_NAME_CHARS,
            });
        }
        Ok(())
    }

    /// One or two uppercase initials, `?` for an empty name.
    pub fn initials(&self) -> String {
        let parts: Vec<&str> = self.display_name.split_whitespace().collect();
        let first = |s: &str| s.chars().next().map(|c| c.to_uppercase().collect::<String>());
        match parts.as_slice() {
            [] => "?".to_string(),
            [only] => first(*only).unwrap_or_else(|| "?".to_string()),
            [head, .., last] => format!(
                "{}{}",
                first(*head).unwrap_or_default(),
                first(*last).unwrap_or_default()
            ),
        }
    }
}

/// A partial edit of a [`Profile`]. Absent fields are left unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(rename = "name", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub skin_color: Option<Color>,
    #[serde(default)]
    pub hair_style: Option<HairStyle>,
    #[serde(default)]
    pub hair_color: Option<Color>,
    #[serde(default)]
    pub accessory: Option<Accessory>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.skin_color.is_none()
            && self.hair_style.is_none()
            && self.hair_color.is_none()
            && self.accessory.is_none()
    }

    /// Merge onto `base`, stamping `last_updated = now`.
    pub fn apply(&self, base: &Profile, now: u64) -> Result<Profile> {
        let mut next = base.clone();
        if let Some(name) = &self.display_name {
            next.display_name = name.clone();
        }
        if let Some(color) = &self.skin_color {
            next.skin_color = color.clone();
        }
        if let Some(style) = self.hair_style {
            next.hair_style = style;
        }
        if let Some(color) = &self.hair_color {
            next.hair_color = color.clone();
        }
        if let Some(accessory) = self.accessory {
            next.accessory = accessory;
        }
        next.last_updated = Some(now);
        next.validate()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_parse() {
        assert_eq!(Color::parse("#e0ac69").expect("valid").as_str(), "#E0AC69");
        assert!(Color::parse("E0AC69").is_err());
        assert!(Color::parse("#E0AC6").is_err());
        assert!(Color::parse("#GGGGGG").is_err());
    }

    #[test]
    fn test_default_profile() {
        let p = Profile::new_default(1000);
        assert_eq!(p.display_name, "");
        assert_eq!(p.skin_color.as_str(), DEFAULT_SKIN_COLOR);
        assert_eq!(p.hair_color.as_str(), DEFAULT_HAIR_COLOR);
        assert_eq!(p.hair_style, HairStyle::Short);
        assert_eq!(p.accessory, Accessory::None);
        assert_eq!(p.created_at, 1000);
        assert!(p.last_updated.is_none());
    }

    #[test]
    fn test_profile_wire_shape() {
        let p = Profile::new_default(5);
        let value = serde_json::to_value(&p).expect("serialize");
        assert_eq!(value["name"], "");
        assert_eq!(value["skinColor"], DEFAULT_SKIN_COLOR);
        assert_eq!(value["hairStyle"], 0);
        assert_eq!(value["accessory"], 0);
        assert_eq!(value["createdAt"], 5);
        assert!(value.get("lastUpdated").is_none());
    }

    #[test]
    fn test_profile_rejects_unknown_index() {
        let json = r##"{"name":"Bo","skinColor":"#E0AC69","hairStyle":9,"hairColor":"#3D2314"}"##;
        let parsed: std::result::Result<Profile, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_update_merges_and_stamps() {
        let base = Profile::new_default(1);
        let update = ProfileUpdate {
            display_name: Some("Bo".into()),
            hair_style: Some(HairStyle::Curly),
            ..Default::default()
        };
        let next = update.apply(&base, 99).expect("apply");
        assert_eq!(next.display_name, "Bo");
        assert_eq!(next.hair_style, HairStyle::Curly);
        assert_eq!(next.skin_color, base.skin_color);
        assert_eq!(next.created_at, 1);
        assert_eq!(next.last_updated, Some(99));
    }

    #[test]
    fn test_update_rejects_long_name() {
        let base = Profile::new_default(1);
        let update = ProfileUpdate {
            display_name: Some("x".repeat(21)),
            ..Default::default()
        };
        assert!(matches!(
            update.apply(&base, 2),
            Err(TypesError::NameTooLong { len: 21, max: 20 })
        ));
    }

    #[test]
    fn test_name_limit_counts_characters() {
        let mut p = Profile::new_default(1);
        p.display_name = "é".repeat(20);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_initials() {
        let mut p = Profile::new_default(1);
        assert_eq!(p.initials(), "?");
        p.display_name = "bo".into();
        assert_eq!(p.initials(), "B");
        p.display_name = "ada k lovelace".into();
        assert_eq!(p.initials(), "AL");
    }

    #[test]
    fn test_cycle_wraps() {
        assert_eq!(HairStyle::Bald.cycle(), HairStyle::Short);
        assert_eq!(Accessory::Glasses.cycle(), Accessory::Hat);
        assert_eq!(Accessory::Mask.cycle(), Accessory::None);
    }
}
