//! Identity record types shared by the extraction pipeline, the review step
//! and the exporters.

use serde::{Deserialize, Deserializer, Serialize};

/// Spreadsheet column headers, in export order.
pub const COLUMNS: [&str; 10] = [
    "Cédula",
    "Código Dactilar",
    "Apellidos",
    "Nombres",
    "Provincia",
    "Ciudad",
    "Es Extranjero",
    "Correo Electrónico",
    "Celular",
    "Tiempo Vigencia",
];

/// The JSON object the vision model is asked to return.
///
/// Every key is optional and any scalar is accepted: the model sometimes
/// answers the ID number as a JSON number or a missing field as `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExtraction {
    #[serde(default, deserialize_with = "lenient_string")]
    pub cedula: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub codigo_dactilar: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub apellidos: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nombres: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub provincia: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ciudad: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub es_extranjero: String,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Document fields after normalization, before contact data is attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFields {
    pub id_number: String,
    pub fingerprint_code: String,
    pub surname: String,
    pub given_names: String,
    pub province: String,
    pub city: String,
    pub foreign_national: bool,
}

/// How long the requested electronic signature stays valid.
///
/// Serialized as its Spanish label. Deserialization goes through
/// [`Validity::from_label`], so an unknown label becomes one year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Validity {
    #[serde(rename = "15 días")]
    FifteenDays,
    #[serde(rename = "30 días")]
    ThirtyDays,
    #[default]
    #[serde(rename = "1 año")]
    OneYear,
    #[serde(rename = "2 años")]
    TwoYears,
    #[serde(rename = "3 años")]
    ThreeYears,
    #[serde(rename = "4 años")]
    FourYears,
    #[serde(rename = "5 años")]
    FiveYears,
}

impl Validity {
    pub const ALL: [Validity; 7] = [
        Validity::FifteenDays,
        Validity::ThirtyDays,
        Validity::OneYear,
        Validity::TwoYears,
        Validity::ThreeYears,
        Validity::FourYears,
        Validity::FiveYears,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Validity::FifteenDays => "15 días",
            Validity::ThirtyDays => "30 días",
            Validity::OneYear => "1 año",
            Validity::TwoYears => "2 años",
            Validity::ThreeYears => "3 años",
            Validity::FourYears => "4 años",
            Validity::FiveYears => "5 años",
        }
    }

    /// Parse a label, falling back to one year for anything unknown.
    pub fn from_label(label: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|v| v.label() == label.trim())
            .unwrap_or_default()
    }
}

impl<'de> Deserialize<'de> for Validity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = lenient_string(deserializer)?;
        Ok(Self::from_label(&label))
    }
}

/// Operator-supplied contact data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub validity: Validity,
}

/// A complete record: extracted document fields plus contact data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedIdentity {
    #[serde(flatten)]
    pub fields: IdentityFields,
    #[serde(flatten)]
    pub contact: ContactInfo,
}

impl ExtractedIdentity {
    pub fn new(fields: IdentityFields, contact: ContactInfo) -> Self {
        Self { fields, contact }
    }

    /// Apply the operator's edits. Names and geography are uppercased the
    /// same way the extraction output is.
    pub fn apply_review(&mut self, edit: ExtractedIdentity) {
        let ExtractedIdentity { fields, contact } = edit;
        self.fields = IdentityFields {
            id_number: fields.id_number.trim().to_string(),
            fingerprint_code: fields.fingerprint_code.trim().to_string(),
            surname: fields.surname.trim().to_uppercase(),
            given_names: fields.given_names.trim().to_uppercase(),
            province: fields.province.trim().to_uppercase(),
            city: fields.city.trim().to_uppercase(),
            foreign_national: fields.foreign_national,
        };
        self.contact = ContactInfo {
            email: contact.email.trim().to_string(),
            phone: contact.phone.trim().to_string(),
            validity: contact.validity,
        };
    }

    /// Cell values in [`COLUMNS`] order.
    pub fn row(&self) -> [String; 10] {
        let f = &self.fields;
        let c = &self.contact;
        [
            f.id_number.clone(),
            f.fingerprint_code.clone(),
            f.surname.clone(),
            f.given_names.clone(),
            f.province.clone(),
            f.city.clone(),
            if f.foreign_national { "SI" } else { "NO" }.to_string(),
            c.email.clone(),
            c.phone.clone(),
            c.validity.label().to_string(),
        ]
    }

    /// File-name stem built from surname and given names: spaces become
    /// underscores and anything outside `[A-Z0-9_]` is dropped.
    pub fn safe_name(&self) -> String {
        format!("{}_{}", self.fields.surname, self.fields.given_names)
            .replace(' ', "_")
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '_')
            .collect()
    }
}
