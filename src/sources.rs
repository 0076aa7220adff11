//! Source catalog: the fixed set of lore files the generator draws on.
//!
//! Each category maps to one JSON file in the data directory. Record-shaped
//! sources hold an array of objects; `editorial` is a single object describing
//! the narrator. The built-in defaults seed missing or broken files during
//! repair and stand in for the editorial source when it cannot be read.

use serde_json::{json, Value};

/// Largest source file the loader will read.
pub const MAX_SOURCE_BYTES: u64 = 50 * 1024;

/// Files from older layouts that repair moves to `backup/` and removes.
pub const DEPRECATED_FILES: &[&str] = &["pjuskeby.json", "land.json", "organisasjoner.json"];

/// Category that is always present in a context bundle.
pub const EDITORIAL: &str = "editorial";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceShape {
    /// JSON array of objects
    Records,
    /// Single JSON object
    Document,
}

#[derive(Debug, Clone, Copy)]
pub struct SourceSpec {
    pub category: &'static str,
    pub file: &'static str,
    pub shape: SourceShape,
    /// A record is identifiable when it carries any of these fields.
    pub id_fields: &'static [&'static str],
    pub critical: bool,
    pub description: &'static str,
}

pub const SOURCES: &[SourceSpec] = &[
    SourceSpec {
        category: "businesses",
        file: "businesses.json",
        shape: SourceShape::Records,
        id_fields: &["name"],
        critical: true,
        description: "Businesses and trade in Pjuskeby",
    },
    SourceSpec {
        category: "streets",
        file: "streets.json",
        shape: SourceShape::Records,
        id_fields: &["street"],
        critical: true,
        description: "Streets, addresses and residents",
    },
    SourceSpec {
        category: "lakes",
        file: "lakes.json",
        shape: SourceShape::Records,
        id_fields: &["name"],
        critical: false,
        description: "Lakes, ponds and waterways",
    },
    SourceSpec {
        category: "surroundings",
        file: "surroundings.json",
        shape: SourceShape::Records,
        id_fields: &["name"],
        critical: false,
        description: "Nearby areas and neighbouring villages",
    },
    SourceSpec {
        category: "sports",
        file: "sports.json",
        shape: SourceShape::Records,
        id_fields: &["joke_name", "real_name"],
        critical: false,
        description: "Sports and competitions",
    },
    SourceSpec {
        category: "tourist_spots",
        file: "tourist_spots.json",
        shape: SourceShape::Records,
        id_fields: &["joke_name", "real_name"],
        critical: false,
        description: "Tourist attractions and sights",
    },
    SourceSpec {
        category: "places",
        file: "places.json",
        shape: SourceShape::Records,
        id_fields: &["place"],
        critical: false,
        description: "Places in Pjuskeby",
    },
    SourceSpec {
        category: EDITORIAL,
        file: "editorial.json",
        shape: SourceShape::Document,
        id_fields: &["main_character", "role"],
        critical: true,
        description: "Editorial staff and narrator",
    },
];

pub fn source(category: &str) -> Option<&'static SourceSpec> {
    SOURCES.iter().find(|s| s.category == category)
}

pub fn source_for_file(file: &str) -> Option<&'static SourceSpec> {
    SOURCES.iter().find(|s| s.file == file)
}

impl SourceSpec {
    /// Whether `record` is an object carrying a non-null identifier field.
    pub fn has_identifier(&self, record: &Value) -> bool {
        record.as_object().map_or(false, |obj| {
            self.id_fields
                .iter()
                .any(|f| obj.get(*f).map_or(false, |v| !v.is_null()))
        })
    }

    /// Identifier value used to detect duplicates while merging.
    pub fn identifier<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        let obj = record.as_object()?;
        self.id_fields.iter().find_map(|f| obj.get(*f))
    }

    pub fn default_data(&self) -> Value {
        default_for(self.category)
    }
}

fn default_for(category: &str) -> Value {
    match category {
        "businesses" => json!([
            {"name": "Pjuskeby Bakeri", "kind": "bakeri", "activity": "baker brød og kaker",
             "owner": "Solveig Bakersen", "employees": 3, "address": "Storveien 15", "established": "1987"},
            {"name": "Regnskap & Regn AS", "kind": "regnskapsbyrå", "activity": "regnskapsføring og rådgivning",
             "owner": "Olav Tallknuser", "employees": 2, "address": "Lilleveien 8", "established": "1995"},
            {"name": "Pjuskeby Postkontor", "kind": "offentlig tjeneste", "activity": "postlevering og pakketjenester",
             "owner": "Statens Postservice", "employees": 1, "address": "Torget 1", "established": "1923"},
            {"name": "Kåres Sykkelservice", "kind": "verksted", "activity": "sykkelreparasjoner",
             "owner": "Kåre Hjulsen", "employees": 1, "address": "Skogsveien 22", "established": "2010"},
            {"name": "Pjuskeby Minimarked", "kind": "dagligvarehandel", "activity": "salg av dagligvarer",
             "owner": "Familie Handelsen", "employees": 4, "address": "Storveien 3", "established": "1978"}
        ]),
        "streets" => json!([
            {"street": "Storveien", "number": "12", "resident": "Kåre Bjarne", "kind": "enebolig", "built": "1965"},
            {"street": "Lilleveien", "number": "5", "resident": "Solveig Bakersen", "kind": "rekkehus", "built": "1982"},
            {"street": "Skogsveien", "number": "18", "resident": "Olav Tallknuser", "kind": "villa", "built": "1990"},
            {"street": "Fjellveien", "number": "3", "resident": "Astrid Blomkvist", "kind": "leilighet", "built": "1975"},
            {"street": "Kirkegata", "number": "7", "resident": "Gunnar Kirkebø", "kind": "enebolig", "built": "1954"}
        ]),
        "lakes" => json!([
            {"name": "Pjuskevatnet", "kind": "innsjø", "depth": "45 meter",
             "description": "Det største vatnet i området med krystalklart vann",
             "activities": ["fisking", "bading", "båtturer"]},
            {"name": "Lille Tjern", "kind": "tjern", "depth": "8 meter",
             "description": "Et pittoresk lite tjern i skogen, populært for turgåere",
             "activities": ["fisking", "fugletitting"]},
            {"name": "Dypeløkka", "kind": "dam", "depth": "15 meter",
             "description": "Gammel mølledam fra 1800-tallet, nå et fredelig naturområde",
             "activities": ["historiske turer", "fotografering"]}
        ]),
        "surroundings" => json!([
            {"name": "Høyfjell", "kind": "fjellområde", "distance": "15 km nord",
             "description": "Populært turområde med flott utsikt over hele distriktet",
             "activities": ["fjellvandring", "bærplukking", "skigåing"]},
            {"name": "Slettebygd", "kind": "naboby", "distance": "25 km sør", "inhabitants": 850,
             "description": "Nærliggende tettsted med utvidet handel og servicetilbud"},
            {"name": "Kystbygda", "kind": "fiskevær", "distance": "40 km vest", "inhabitants": 320,
             "description": "Pittoresk fiskevær ved kysten, populært turistmål"}
        ]),
        "sports" => json!([
            {"joke_name": "Ekstrem Brevduva-racing", "real_name": "Brevdue-konkurranse", "season": "vår/sommer",
             "participants": ["Kåre Bjarne", "Postmester Ola", "Gunnar Kirkebø"],
             "description": "Årlig konkurranse i brevdue-hastighet over 50 km"},
            {"joke_name": "Kampeloppsett i Rundball", "real_name": "Fotball", "season": "hele året",
             "participants": ["Pjuskeby IL", "Slettebygd FK"],
             "description": "Lokalt fotballag med stor entusiasme og beskjeden ferdighet"},
            {"joke_name": "Vinterslalåm på Søppelposer", "real_name": "Improvisert slalåm", "season": "vinter",
             "participants": ["Alle som har søppelposer og ski"],
             "description": "Kreativ vintersport med improvisert utstyr på Bakketoppen"}
        ]),
        "tourist_spots" => json!([
            {"joke_name": "Verdens Minste Rundkjøring", "real_name": "Torget", "kind": "severdighet",
             "description": "En sirkel av steiner som teknisk sett kvalifiserer som rundkjøring",
             "visit_time": "5 minutter"},
            {"joke_name": "Det Skjeve Huset", "real_name": "Gamle Rådhus", "kind": "historisk bygning",
             "description": "Bygningen heller 15 grader men brukes fortsatt til kommunestyremøter",
             "visit_time": "20 minutter"},
            {"joke_name": "Verdens Stilleste Fossefall", "real_name": "Bekken ved Brua", "kind": "naturattraksjon",
             "description": "Et 30 cm høyt fossefall som knapt lager lyd",
             "visit_time": "10 minutter"}
        ]),
        "places" => json!([
            {"place": "Torget", "kind": "offentlig område",
             "description": "Sentrum av Pjuskeby med blomsterbed, benker og den berømte mini-rundkjøringen",
             "activities": ["markedsdager", "sosiale møter"]},
            {"place": "Pjuskeby Bibliotek", "kind": "kulturinstitusjon",
             "description": "Lille bygning med store vinduer, mange bøker og overraskende god kaffe",
             "activities": ["lesing", "bokklubber", "foredrag"]},
            {"place": "Gammelskogen", "kind": "naturområde",
             "description": "Eldgammel skog like utenfor sentrum med 400 år gamle grantrær",
             "activities": ["turgåing", "soppjakt"]}
        ]),
        EDITORIAL => json!({
            "main_character": "Kåre Bjarne",
            "role": "Nattevakt",
            "description": "Nattevakt og lokaljournalist i Pjuskeby",
            "workplace": "Nattevakten Redaksjon"
        }),
        _ => Value::Null,
    }
}
