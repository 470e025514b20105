//! ID card extraction pipeline: both photos to the vision model, JSON out of
//! the free-text answer, then the deterministic field corrections.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::ExtractionError;
use crate::image_prep::ProcessedImage;
use crate::normalize;
use crate::schema::{IdentityFields, RawExtraction};
use crate::vision::VisionBackend;

/// Instructions sent with the front and back photos.
pub const EXTRACTION_PROMPT: &str = r#"Eres un experto en identificación. Analiza la cédula de Ecuador (anverso y reverso).

INSTRUCCIONES:

1. NACIONALIDAD:
   - Si dice "CHILENA", "COLOMBIANA", "VENEZOLANA", etc. -> es_extranjero = "SI".
   - SOLO si dice "ECUATORIANA" -> es_extranjero = "NO".

2. CÉDULA ANTIGUA (fondo amarillo o rayado):
   - IGNORA el título "CEDULA DE CIUDADANIA".
   - Busca "APELLIDOS Y NOMBRES".
   - La primera línea debajo son los APELLIDOS, la segunda los NOMBRES.

3. CÉDULA NUEVA (blanca):
   - "APELLIDOS" y "NOMBRES": usa el texto al lado de cada etiqueta.

4. CÓDIGO DACTILAR (reverso):
   - Formato: letra, 4 números, letra, 4 números (ej: E3333I1221).

5. UBICACIÓN:
   - Extranjeros: usa "Lugar de Emisión" del reverso.
   - Ecuatorianos: usa "Lugar de Nacimiento" del anverso.

Responde solo JSON: {"cedula": "...", "codigo_dactilar": "...", "apellidos": "...", "nombres": "...", "provincia": "...", "ciudad": "...", "es_extranjero": "..."}"#;

/// Extraction pipeline orchestrator.
#[derive(Clone)]
pub struct Extractor {
    backend: Arc<dyn VisionBackend>,
}

impl Extractor {
    pub fn new(backend: Arc<dyn VisionBackend>) -> Self {
        Self { backend }
    }

    /// Extract and normalize the document fields from both sides of the card.
    ///
    /// Any failure (transport, status, missing or invalid JSON) yields no
    /// record at all.
    pub async fn extract(
        &self,
        front: &ProcessedImage,
        back: &ProcessedImage,
    ) -> Result<IdentityFields, ExtractionError> {
        info!(
            "Starting extraction via {} (front {} bytes, back {} bytes)",
            self.backend.name(),
            front.jpeg.len(),
            back.jpeg.len()
        );

        let images = [front.jpeg.as_slice(), back.jpeg.as_slice()];
        let content = self.backend.complete(EXTRACTION_PROMPT, &images).await?;
        debug!("Raw model answer length: {} chars", content.len());

        let raw = parse_model_json(&content)?;
        let fields = normalize::normalize(&raw, &content);

        info!(
            "Extraction complete: id_number={} fingerprint={}",
            fields.id_number, fields.fingerprint_code
        );
        Ok(fields)
    }
}

/// Greedy span from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Pull the JSON object out of the model's answer and parse it.
pub fn parse_model_json(text: &str) -> Result<RawExtraction, ExtractionError> {
    let json = extract_json_object(text).ok_or(ExtractionError::MissingJson)?;
    serde_json::from_str(json).map_err(ExtractionError::InvalidJson)
}
