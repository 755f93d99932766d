use crate::models::{CuratedEntry, Region};

pub const REGIONS: &[Region] = &[
    Region {
        id: "india",
        name: "India",
        emoji: "🇮🇳",
        countries: &["IN"],
        accent: "india-saffron",
        gradient: "from-orange-500 via-white to-green-600",
    },
    Region {
        id: "us",
        name: "United States",
        emoji: "🇺🇸",
        countries: &["US"],
        accent: "us-blue",
        gradient: "from-blue-600 via-white to-red-600",
    },
    Region {
        id: "europe",
        name: "Europe",
        emoji: "🇪🇺",
        countries: &["GB", "DE", "FR", "ES", "IT", "NL", "BE", "SE", "NO", "DK", "FI", "PL"],
        accent: "europe-gold",
        gradient: "from-blue-700 to-yellow-400",
    },
    Region {
        id: "australia",
        name: "Australia",
        emoji: "🇦🇺",
        countries: &["AU", "NZ"],
        accent: "australia-teal",
        gradient: "from-teal-500 to-yellow-500",
    },
    Region {
        id: "southamerica",
        name: "South America",
        emoji: "🌎",
        countries: &["BR", "AR", "CL", "CO", "PE", "VE"],
        accent: "southamerica-emerald",
        gradient: "from-emerald-500 to-yellow-400",
    },
    Region {
        id: "africa",
        name: "Africa",
        emoji: "🌍",
        countries: &["ZA", "NG", "KE", "EG", "MA", "GH"],
        accent: "africa-orange",
        gradient: "from-orange-600 to-yellow-500",
    },
];

const fn entry(search_name: &'static str, display_name: &'static str) -> CuratedEntry {
    CuratedEntry {
        search_name,
        display_name,
    }
}

const CURATED: &[(&str, &[CuratedEntry])] = &[
    (
        "india",
        &[
            entry("Radio Mirchi", "Radio Mirchi 98.3 FM"),
            entry("Red FM", "Red FM 93.5"),
            entry("Big FM", "Big FM 92.7"),
            entry("Radio City", "Radio City 91.1 FM"),
            entry("All India Radio", "All India Radio"),
            entry("Fever FM", "Fever FM 104"),
        ],
    ),
    (
        "us",
        &[
            entry("NPR", "NPR News"),
            entry("iHeartRadio", "iHeartRadio"),
            entry("Hot 97", "Hot 97 FM"),
            entry("KISS FM", "KISS FM"),
            entry("Power 106", "Power 106 FM"),
            entry("Z100", "Z100 New York"),
        ],
    ),
    (
        "europe",
        &[
            entry("BBC Radio 1", "BBC Radio 1"),
            entry("BBC Radio 2", "BBC Radio 2"),
            entry("RTL", "RTL Radio"),
            entry("NRJ", "NRJ Radio"),
            entry("Antenne Bayern", "Antenne Bayern"),
            entry("Europa FM", "Europa FM"),
        ],
    ),
    (
        "australia",
        &[
            entry("Triple J", "Triple J"),
            entry("Nova", "Nova FM"),
            entry("ABC Radio", "ABC Radio"),
            entry("Hit FM", "Hit FM Australia"),
            entry("KIIS FM", "KIIS FM Sydney"),
        ],
    ),
    (
        "southamerica",
        &[
            entry("Gaúcha", "Rádio Gaúcha"),
            entry("Caracol", "Caracol Radio"),
            entry("Jovem Pan", "Jovem Pan FM"),
            entry("Radio Nacional", "Radio Nacional"),
            entry("Radio Disney", "Radio Disney"),
        ],
    ),
    (
        "africa",
        &[
            entry("Metro FM", "Metro FM South Africa"),
            entry("Kaya FM", "Kaya FM 95.9"),
            entry("Classic FM", "Classic FM Nigeria"),
            entry("Capital FM", "Capital FM Kenya"),
            entry("YFM", "YFM Johannesburg"),
        ],
    ),
];

pub fn find_region(id: &str) -> Option<&'static Region> {
    REGIONS.iter().find(|r| r.id == id)
}

/// Curated lookups for a region, empty when the region has none.
pub fn curated_for(region_id: &str) -> &'static [CuratedEntry] {
    CURATED
        .iter()
        .find(|(id, _)| *id == region_id)
        .map(|(_, entries)| *entries)
        .unwrap_or(&[])
}
