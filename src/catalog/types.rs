use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages the catalog is maintained in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
  Tr,
  En,
  Ru,
  Bg,
}

impl Language {
  pub const ALL: [Language; 4] = [Language::Tr, Language::En, Language::Ru, Language::Bg];

  pub fn code(self) -> &'static str {
    match self {
      Language::Tr => "tr",
      Language::En => "en",
      Language::Ru => "ru",
      Language::Bg => "bg",
    }
  }
}

impl fmt::Display for Language {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.code())
  }
}

impl FromStr for Language {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "tr" => Ok(Language::Tr),
      "en" => Ok(Language::En),
      "ru" => Ok(Language::Ru),
      "bg" => Ok(Language::Bg),
      other => Err(format!("unsupported language code '{}'", other)),
    }
  }
}

/// Translatable text of a catalog item.
///
/// Used both for the canonical (base-language) values and for per-language
/// overrides, where `None` or a blank string means "not translated".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFields {
  pub name: Option<String>,
  pub description: Option<String>,
  pub aroma: Option<String>,
  pub taste: Option<String>,
  pub finish: Option<String>,
  pub color: Option<String>,
  pub region: Option<String>,
  #[serde(rename = "type")]
  pub kind: Option<String>,
}

fn is_blank(value: &Option<String>) -> bool {
  value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn pick(over: &Option<String>, base: &Option<String>) -> Option<String> {
  if is_blank(over) {
    base.clone()
  } else {
    over.clone()
  }
}

fn assign(target: &mut Option<String>, value: &Option<String>) {
  if let Some(v) = value {
    *target = Some(v.clone());
  }
}

impl TextFields {
  /// Field-by-field overlay: blank fields of `self` take the value from `base`.
  pub fn overlay(&self, base: &TextFields) -> TextFields {
    TextFields {
      name: pick(&self.name, &base.name),
      description: pick(&self.description, &base.description),
      aroma: pick(&self.aroma, &base.aroma),
      taste: pick(&self.taste, &base.taste),
      finish: pick(&self.finish, &base.finish),
      color: pick(&self.color, &base.color),
      region: pick(&self.region, &base.region),
      kind: pick(&self.kind, &base.kind),
    }
  }

  /// Copy every field that `patch` supplies; fields it leaves as `None` keep
  /// their current value.
  pub fn apply(&mut self, patch: &TextFields) {
    assign(&mut self.name, &patch.name);
    assign(&mut self.description, &patch.description);
    assign(&mut self.aroma, &patch.aroma);
    assign(&mut self.taste, &patch.taste);
    assign(&mut self.finish, &patch.finish);
    assign(&mut self.color, &patch.color);
    assign(&mut self.region, &patch.region);
    assign(&mut self.kind, &patch.kind);
  }

  pub fn is_empty(&self) -> bool {
    *self == TextFields::default()
  }

  /// Primary display field and category field are both present.
  pub fn is_complete(&self) -> bool {
    !is_blank(&self.name) && !is_blank(&self.kind)
  }
}

/// Base-language, authoritative row for a catalog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
  pub id: i64,
  pub country: Option<String>,
  pub percentage: Option<f64>,
  pub image_url: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
  /// Last write on the backend, used to detect divergence during sync
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub text: TextFields,
}

impl CanonicalRecord {
  /// Copy carrying the current time as `updated_at`, for writing to the
  /// backend. The stored timestamp is what other clients compare against.
  pub fn stamped(&self) -> Self {
    Self {
      updated_at: Some(Utc::now()),
      ..self.clone()
    }
  }
}

/// Provenance of a translation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationStatus {
  Human,
  Machine,
  Pending,
  Failed,
}

/// Override of the text fields for one `(record_id, language_code)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
  #[serde(rename = "whisky_id")]
  pub record_id: i64,
  pub language_code: Language,
  #[serde(flatten)]
  pub text: TextFields,
  pub translation_status: TranslationStatus,
  pub source_language_code: Option<Language>,
}

/// A canonical record as returned by the backend, with its translations
/// embedded when the join is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
  #[serde(flatten)]
  pub record: CanonicalRecord,
  #[serde(default)]
  pub translations: Vec<Translation>,
}

/// Display-ready projection of a record in one language.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalizedRecord {
  pub id: i64,
  pub country: Option<String>,
  pub percentage: Option<f64>,
  pub image_url: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
  pub text: TextFields,
  /// Language that was asked for
  pub requested: Language,
  /// Language whose values are actually shown
  pub lang_used: Language,
  pub translation_status: Option<TranslationStatus>,
  pub is_complete: bool,
}

impl LocalizedRecord {
  /// Shown in another language than the one requested.
  pub fn is_fallback(&self) -> bool {
    self.requested != self.lang_used
  }
}

/// Typed partial update of a record's text in one language.
///
/// Only the fields set through the builder are written; everything else keeps
/// its stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPatch {
  pub language: Language,
  pub fields: TextFields,
}

impl RecordPatch {
  pub fn new(language: Language) -> Self {
    Self {
      language,
      fields: TextFields::default(),
    }
  }

  pub fn name(mut self, value: impl Into<String>) -> Self {
    self.fields.name = Some(value.into());
    self
  }

  pub fn description(mut self, value: impl Into<String>) -> Self {
    self.fields.description = Some(value.into());
    self
  }

  pub fn aroma(mut self, value: impl Into<String>) -> Self {
    self.fields.aroma = Some(value.into());
    self
  }

  pub fn taste(mut self, value: impl Into<String>) -> Self {
    self.fields.taste = Some(value.into());
    self
  }

  pub fn finish(mut self, value: impl Into<String>) -> Self {
    self.fields.finish = Some(value.into());
    self
  }

  pub fn color(mut self, value: impl Into<String>) -> Self {
    self.fields.color = Some(value.into());
    self
  }

  pub fn region(mut self, value: impl Into<String>) -> Self {
    self.fields.region = Some(value.into());
    self
  }

  pub fn kind(mut self, value: impl Into<String>) -> Self {
    self.fields.kind = Some(value.into());
    self
  }

  /// Set a field by its column name, as the CLI receives it.
  pub fn set(self, field: &str, value: impl Into<String>) -> Result<Self, String> {
    Ok(match field {
      "name" => self.name(value),
      "description" => self.description(value),
      "aroma" => self.aroma(value),
      "taste" => self.taste(value),
      "finish" => self.finish(value),
      "color" => self.color(value),
      "region" => self.region(value),
      "type" | "kind" => self.kind(value),
      other => return Err(format!("unknown field '{}'", other)),
    })
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }
}
