//! Deterministic corrections applied to the fields returned by the vision model.
//!
//! Pure functions, no async. Every step works on the raw extraction plus the
//! full response text; nothing here can fail. An unrecoverable field is left
//! as the empty string.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::geography;
use crate::schema::{IdentityFields, RawExtraction};

/// Labels printed on the card itself. A value containing one of these is the
/// model copying the label instead of the value.
const BOILERPLATE: [&str; 3] = ["CEDULA", "CIUDADANIA", "REPUBLICA"];

/// Sex / marital-status / donor labels that are never a valid field value.
const LABEL_VALUES: [&str; 6] = ["MUJER", "HOMBRE", "DONANTE", "SEXO", "SOLTERO", "CASADO"];

/// Words removed from a surname that swallowed the card title.
const SURNAME_NOISE: [&str; 6] = ["CEDULA", "DE", "CIUDADANIA", "REPUBLICA", "DEL", "ECUADOR"];

/// Location text that marks a foreign resident.
const FOREIGN_MARKERS: [&str; 2] = ["CHILE", "IQUIQUE"];

/// A raw fingerprint value this long is prose, not a code.
const FINGERPRINT_PROSE_LEN: usize = 15;

static DATE_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{2}\s+[A-Z]{3}\s+\d{4}").expect("valid date regex"));
static ALNUM_RUN_10: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z0-9]{10}").expect("valid fingerprint regex"));
static ID_NUMBER_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{9,10}\b").expect("valid id regex"));

/// Normalize a raw extraction into identity fields.
///
/// `response_text` is the full message content returned by the model; it is
/// only used by the fallback scans for the fingerprint code and ID number.
pub fn normalize(raw: &RawExtraction, response_text: &str) -> IdentityFields {
    let foreign_national = has_foreign_marker(&raw.ciudad, &raw.provincia)
        || is_affirmative(&clean_text(&raw.es_extranjero));

    let (province, city) = reconcile_geography(&raw.provincia, &raw.ciudad);

    let fingerprint_source = if raw.codigo_dactilar.chars().count() > FINGERPRINT_PROSE_LEN {
        ALNUM_RUN_10
            .find(response_text)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    } else {
        raw.codigo_dactilar.clone()
    };
    let fingerprint_code = clean_text(&repair_fingerprint(&fingerprint_source));

    let id_number = clean_text(&repair_id_number(&raw.cedula, response_text));
    let surname = clean_text(&rescue_surname(&raw.apellidos));
    let given_names = clean_text(&raw.nombres);

    let fields = IdentityFields {
        id_number,
        fingerprint_code,
        surname,
        given_names,
        province,
        city,
        foreign_national,
    };
    debug!("Normalized extraction: {:?}", fields);
    fields
}

/// Trim, uppercase and strip quotes. Returns empty if the value is card
/// boilerplate or a sex / marital-status label.
pub fn clean_text(text: &str) -> String {
    let text = text.trim().to_uppercase().replace(['"', '\''], "");
    if BOILERPLATE.iter().any(|b| text.contains(b)) {
        return String::new();
    }
    if LABEL_VALUES.contains(&text.as_str()) {
        return String::new();
    }
    text
}

/// Force the fingerprint code into letter-4 digits-letter-4 digits shape.
///
/// Positions 0 and 5 must be letters, the rest digits; common OCR confusions
/// are swapped for their counterpart. Characters with no counterpart are left
/// in place. Running it on its own output is a no-op.
pub fn repair_fingerprint(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut compact: String = raw
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
        .collect();

    if compact.chars().count() != 10 {
        match ALNUM_RUN_10.find(&compact) {
            Some(m) => compact = m.as_str().to_string(),
            None => return raw.to_string(),
        }
    }

    compact
        .chars()
        .enumerate()
        .map(|(i, c)| match i {
            0 | 5 => digit_to_letter(c),
            _ => letter_to_digit(c),
        })
        .collect()
}

fn digit_to_letter(c: char) -> char {
    match c {
        '0' => 'O',
        '1' => 'I',
        '2' => 'Z',
        '5' => 'S',
        '8' => 'B',
        'H' => 'I',
        other => other,
    }
}

fn letter_to_digit(c: char) -> char {
    match c {
        'O' | 'D' => '0',
        'I' | 'L' => '1',
        'Z' => '2',
        'S' => '5',
        'B' => '8',
        other => other,
    }
}

/// Clean province and city and fix the city/province confusion.
///
/// Returns `(province, city)`. A province value that is actually a known city
/// moves into the city slot and the province is replaced by its mapped value.
pub fn reconcile_geography(province: &str, city: &str) -> (String, String) {
    let mut city = clean_text(city);
    city = DATE_IN_TEXT.replace_all(&city, "").trim().to_string();
    let mut province = clean_text(province);

    if let Some(mapped) = geography::province_for_city(&province) {
        debug!("Province '{}' is a city, moving it to city", province);
        city = province;
        province = mapped.to_string();
    } else if let Some(mapped) = geography::province_for_city(&city) {
        province = mapped.to_string();
    }

    (province, city)
}

/// Returns true if the raw location text names a foreign place.
pub fn has_foreign_marker(city: &str, province: &str) -> bool {
    let location = format!("{}{}", city, province).to_uppercase();
    FOREIGN_MARKERS.iter().any(|m| location.contains(m))
}

fn is_affirmative(flag: &str) -> bool {
    flag.contains("SI") || flag.contains("SÍ")
}

/// Strip separators from the ID number; fall back to the first 9-10 digit run
/// in the response text when the value is missing or too short.
pub fn repair_id_number(raw: &str, response_text: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '.')
        .collect();

    if stripped.chars().count() < 9 {
        if let Some(m) = ID_NUMBER_RUN.find(response_text) {
            debug!("ID number '{}' too short, recovered '{}' from response", raw, m.as_str());
            return m.as_str().to_string();
        }
    }
    stripped
}

/// Remove card-title words from a surname that swallowed them, keeping the
/// real surname (e.g. "CIUDADANIA JIMENEZ" → "JIMENEZ").
pub fn rescue_surname(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    if !BOILERPLATE.iter().any(|b| upper.contains(b)) {
        return upper;
    }
    upper
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| c.is_ascii_punctuation()))
        .filter(|word| !word.is_empty() && !SURNAME_NOISE.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_structure(code: &str) {
        let chars: Vec<char> = code.chars().collect();
        assert_eq!(chars.len(), 10, "{}", code);
        for (i, c) in chars.iter().enumerate() {
            if i == 0 || i == 5 {
                assert!(c.is_ascii_alphabetic(), "position {} of {} should be a letter", i, code);
            } else {
                assert!(c.is_ascii_digit(), "position {} of {} should be a digit", i, code);
            }
        }
    }

    #[test]
    fn test_clean_text_boilerplate() {
        assert_eq!(clean_text("CEDULA DE CIUDADANIA"), "");
        assert_eq!(clean_text("Republica del Ecuador"), "");
        assert_eq!(clean_text("SOLTERO"), "");
        assert_eq!(clean_text(" mujer "), "");
        assert_eq!(clean_text("  \"perez\" "), "PEREZ");
        assert_eq!(clean_text("O'BRIEN"), "OBRIEN");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn test_fingerprint_confusions() {
        assert_eq!(repair_fingerprint("E3333I1221"), "E3333I1221");
        assert_eq!(repair_fingerprint("83O3SH1Z2L"), "B3035I1221");
        assert_eq!(repair_fingerprint("e3333-i1221"), "E3333I1221");
        assert_eq!(repair_fingerprint("0 12B4 5 6789"), "O1284S6789");
    }

    #[test]
    fn test_fingerprint_structure() {
        let inputs = [
            "E3333I1221",
            "83O3SH1Z2L",
            "0OOOO1IIII",
            "HDDDD8BBBB",
            "5SSSS2ZZZZ",
            "v1234 h5678",
            "A123.4B567.8",
        ];
        for input in inputs {
            assert_structure(&repair_fingerprint(input));
        }
    }

    #[test]
    fn test_fingerprint_idempotent() {
        let inputs = [
            "E3333I1221",
            "83O3SH1Z2L",
            "0OOOO1IIII",
            "HDDDD8BBBB",
            "XYZ",
            "CODIGO V1234H5678 FIN",
            "",
        ];
        for input in inputs {
            let once = repair_fingerprint(input);
            assert_eq!(repair_fingerprint(&once), once, "input {}", input);
        }
    }

    #[test]
    fn test_fingerprint_finds_run_or_keeps_input() {
        assert_eq!(repair_fingerprint("V1234H5678-XX"), "V1234I5678");
        assert_eq!(repair_fingerprint("ABC"), "ABC");
        assert_eq!(repair_fingerprint(""), "");
    }

    #[test]
    fn test_reconcile_city_in_province_slot() {
        let (province, city) = reconcile_geography("AZOGUES", "");
        assert_eq!(province, "CAÑAR");
        assert_eq!(city, "AZOGUES");
    }

    #[test]
    fn test_reconcile_leaves_province_alone() {
        let (province, city) = reconcile_geography("", "CAÑAR");
        assert_eq!(province, "");
        assert_eq!(city, "CAÑAR");
    }

    #[test]
    fn test_reconcile_city_fills_province() {
        let (province, city) = reconcile_geography("guayas", "duran");
        assert_eq!(province, "GUAYAS");
        assert_eq!(city, "DURAN");

        let (province, city) = reconcile_geography("XXX", "cuenca");
        assert_eq!(province, "AZUAY");
        assert_eq!(city, "CUENCA");
    }

    #[test]
    fn test_reconcile_strips_dates_from_city() {
        let (province, city) = reconcile_geography("PICHINCHA", "QUITO 12 MAR 1990");
        assert_eq!(province, "PICHINCHA");
        assert_eq!(city, "QUITO");
    }

    #[test]
    fn test_foreign_markers() {
        assert!(has_foreign_marker("Iquique", ""));
        assert!(has_foreign_marker("", "SANTIAGO DE CHILE"));
        assert!(!has_foreign_marker("QUITO", "PICHINCHA"));
    }

    #[test]
    fn test_nationality_override() {
        let raw = RawExtraction {
            ciudad: "IQUIQUE".to_string(),
            es_extranjero: "NO".to_string(),
            ..Default::default()
        };
        let fields = normalize(&raw, "");
        assert!(fields.foreign_national);
        assert_eq!(fields.province, "EXTRANJERO");

        let raw = RawExtraction {
            provincia: "chile".to_string(),
            es_extranjero: "NO".to_string(),
            ..Default::default()
        };
        assert!(normalize(&raw, "").foreign_national);
    }

    #[test]
    fn test_nationality_from_model() {
        let mut raw = RawExtraction {
            es_extranjero: "si".to_string(),
            ..Default::default()
        };
        assert!(normalize(&raw, "").foreign_national);
        raw.es_extranjero = "NO".to_string();
        assert!(!normalize(&raw, "").foreign_national);
    }

    #[test]
    fn test_id_number_fallback() {
        let text = r#"{"cedula": "171", "nota": "numero 1712345678 al frente"}"#;
        assert_eq!(repair_id_number("171", text), "1712345678");
        assert_eq!(repair_id_number("", "sin numeros"), "");
        assert_eq!(repair_id_number("171234567-8", "0999999999"), "1712345678");
        assert_eq!(repair_id_number("091.234.567", ""), "091234567");
    }

    #[test]
    fn test_surname_rescue() {
        assert_eq!(rescue_surname("CIUDADANIA JIMENEZ"), "JIMENEZ");
        assert_eq!(rescue_surname("cedula de ciudadania vera loor"), "VERA LOOR");
        assert_eq!(rescue_surname("DE LA CRUZ"), "DE LA CRUZ");
        assert_eq!(rescue_surname("CIUDADANIA: JIMENEZ"), "JIMENEZ");
        assert_eq!(rescue_surname("REPUBLICA DEL ECUADOR PEREZ"), "PEREZ");
        assert_eq!(clean_text(&rescue_surname("CEDULA, DE CIUDADANIA. MORA")), "MORA");
    }

    #[test]
    fn test_fingerprint_prose_falls_back_to_response() {
        let text = r#"{"codigo_dactilar": "no se distingue bien el codigo"} V4443V4442"#;
        let raw = RawExtraction {
            codigo_dactilar: "no se distingue bien el codigo".to_string(),
            ..Default::default()
        };
        assert_eq!(normalize(&raw, text).fingerprint_code, "V4443V4442");
    }

    #[test]
    fn test_normalize_full_record() {
        let raw = RawExtraction {
            cedula: "0301234567".to_string(),
            codigo_dactilar: "E3333H1221".to_string(),
            apellidos: "CIUDADANIA PEREZ LOPEZ".to_string(),
            nombres: "juan carlos".to_string(),
            provincia: "AZOGUES".to_string(),
            ciudad: "".to_string(),
            es_extranjero: "NO".to_string(),
        };
        let fields = normalize(&raw, "");
        assert_eq!(fields.id_number, "0301234567");
        assert_eq!(fields.fingerprint_code, "E3333I1221");
        assert_eq!(fields.surname, "PEREZ LOPEZ");
        assert_eq!(fields.given_names, "JUAN CARLOS");
        assert_eq!(fields.province, "CAÑAR");
        assert_eq!(fields.city, "AZOGUES");
        assert!(!fields.foreign_national);
    }
}
