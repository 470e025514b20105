//! City → province reference table for Ecuadorian ID cards.
//!
//! The model frequently confuses a canton with its province (e.g. "AZOGUES"
//! read as the province of birth). This table is the only reference data used
//! to repair those extractions.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Province value used for cities outside Ecuador.
pub const FOREIGN_PROVINCE: &str = "EXTRANJERO";

static CITY_TO_PROVINCE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("AZOGUES", "CAÑAR"),
        ("CUENCA", "AZUAY"),
        ("GUALACEO", "AZUAY"),
        ("SIGSIG", "AZUAY"),
        ("GIRON", "AZUAY"),
        ("PAUTE", "AZUAY"),
        ("MACHALA", "EL ORO"),
        ("PASAJE", "EL ORO"),
        ("SANTA ROSA", "EL ORO"),
        ("HUAQUILLAS", "EL ORO"),
        ("PIÑAS", "EL ORO"),
        ("QUITO", "PICHINCHA"),
        ("GUAYAQUIL", "GUAYAS"),
        ("SAMBORONDON", "GUAYAS"),
        ("DAULE", "GUAYAS"),
        ("DURAN", "GUAYAS"),
        ("LOJA", "LOJA"),
        ("AMBATO", "TUNGURAHUA"),
        ("RIOBAMBA", "CHIMBORAZO"),
        ("IBARRA", "IMBABURA"),
        ("TULCAN", "CARCHI"),
        ("ESMERALDAS", "ESMERALDAS"),
        ("PORTOVIEJO", "MANABI"),
        ("MANTA", "MANABI"),
        ("SANTO DOMINGO", "SANTO DOMINGO"),
        ("LATACUNGA", "COTOPAXI"),
        ("GUARANDA", "BOLIVAR"),
        ("BABAHOYO", "LOS RIOS"),
        ("QUEVEDO", "LOS RIOS"),
        ("MACAS", "MORONA SANTIAGO"),
        ("PUYO", "PASTAZA"),
        ("TENA", "NAPO"),
        ("ZAMORA", "ZAMORA CHINCHIPE"),
        ("NUEVA LOJA", "SUCUMBIOS"),
        ("ORELLANA", "ORELLANA"),
        ("COCA", "ORELLANA"),
        ("SANTA CRUZ", "GALAPAGOS"),
        ("SAN CRISTOBAL", "GALAPAGOS"),
        ("IQUIQUE", FOREIGN_PROVINCE),
    ]
    .into_iter()
    .collect()
});

/// Province for a known city, if any. Keys are uppercase.
pub fn province_for_city(city: &str) -> Option<&'static str> {
    CITY_TO_PROVINCE.get(city).copied()
}

/// Number of entries in the table.
pub fn len() -> usize {
    CITY_TO_PROVINCE.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_cities() {
        assert_eq!(province_for_city("AZOGUES"), Some("CAÑAR"));
        assert_eq!(province_for_city("COCA"), Some("ORELLANA"));
        assert_eq!(province_for_city("IQUIQUE"), Some(FOREIGN_PROVINCE));
        assert!(len() >= 39);
    }

    #[test]
    fn test_provinces_are_not_keys() {
        assert_eq!(province_for_city("CAÑAR"), None);
        assert_eq!(province_for_city("PICHINCHA"), None);
        // Lookup is exact, callers uppercase first
        assert_eq!(province_for_city("quito"), None);
    }
}
