//! Resolve a canonical record plus its translations into one localized value.

use super::types::{CanonicalRecord, Language, LocalizedRecord, Translation};

/// Languages to try, in order: the requested one first, then the fallback
/// order without the requested language repeated.
pub fn candidate_order(requested: Language, fallback_order: &[Language]) -> Vec<Language> {
  let mut order = Vec::with_capacity(fallback_order.len() + 1);
  order.push(requested);
  for lang in fallback_order {
    if !order.contains(lang) {
      order.push(*lang);
    }
  }
  order
}

/// Produce the best localized projection of `record`.
///
/// The first candidate language with a translation row wins, and any blank
/// field in that row is taken from the canonical record (never from another
/// translation). When the winner is the base language, or the base language
/// was requested, the record's own fields are shown instead of the row.
pub fn resolve(
  record: &CanonicalRecord,
  translations: &[Translation],
  requested: Language,
  base: Language,
  fallback_order: &[Language],
) -> LocalizedRecord {
  if requested == base {
    return canonical(record, requested, base);
  }

  let winner = candidate_order(requested, fallback_order)
    .into_iter()
    .find_map(|lang| {
      translations
        .iter()
        .find(|t| t.record_id == record.id && t.language_code == lang)
    });

  match winner {
    Some(translation) if translation.language_code != base => {
      let text = translation.text.overlay(&record.text);
      let is_complete = text.is_complete();
      LocalizedRecord {
        id: record.id,
        country: record.country.clone(),
        percentage: record.percentage,
        image_url: record.image_url.clone(),
        created_at: record.created_at,
        text,
        requested,
        lang_used: translation.language_code,
        translation_status: Some(translation.translation_status),
        is_complete,
      }
    }
    _ => canonical(record, requested, base),
  }
}

/// Projection that shows the canonical fields as-is.
///
/// Also used in degraded mode, when translations could not be loaded at all.
pub fn canonical(record: &CanonicalRecord, requested: Language, base: Language) -> LocalizedRecord {
  LocalizedRecord {
    id: record.id,
    country: record.country.clone(),
    percentage: record.percentage,
    image_url: record.image_url.clone(),
    created_at: record.created_at,
    text: record.text.clone(),
    requested,
    lang_used: base,
    translation_status: None,
    is_complete: record.text.is_complete(),
  }
}
