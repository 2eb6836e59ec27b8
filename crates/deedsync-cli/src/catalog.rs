use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use deedsync_core::{Partition, PartitionId};
use serde::Deserialize;

const STATE: &str = "Telangana";

/// Built-in sub-registrar offices: `(district, district_code, office, sro_code)`.
const OFFICES: &[(&str, &str, &str, &str)] = &[
    ("Rangareddy", "15_1", "ABDULLAPURMET", "1531"),
    ("Rangareddy", "15_1", "CHAMPAPET", "1514"),
    ("Rangareddy", "15_1", "CHEVELLA", "1501"),
    ("Rangareddy", "15_1", "FAROOQ NAGAR", "1415"),
    ("Rangareddy", "15_1", "GANDIPET", "1525"),
    ("Rangareddy", "15_1", "HAYATHNAGAR", "1502"),
    ("Rangareddy", "15_1", "IBRAHIMPATNAM", "1503"),
    ("Rangareddy", "15_1", "L.B.NAGAR", "1527"),
    ("Rangareddy", "15_1", "MAHESWARAM", "1519"),
    ("Rangareddy", "15_1", "PEDDA AMBERPET", "1515"),
    ("Rangareddy", "15_1", "RAJENDRA NAGAR", "1518"),
    ("Rangareddy", "15_1", "RANGA REDDY (R.O)", "1510"),
    ("Rangareddy", "15_1", "SAROORNAGAR", "1513"),
    ("Rangareddy", "15_1", "SERILINGAMPALLI", "1522"),
    ("Rangareddy", "15_1", "SHADNAGAR", "1411"),
    ("Rangareddy", "15_1", "SHAMSHABAD", "1520"),
    ("Rangareddy", "15_1", "SHANKARPALLY", "1524"),
    ("Rangareddy", "15_1", "VANASTHALIPURAM", "1528"),
    ("Hyderabad", "16_1", "BANJARAHILLS (R.O)", "1604"),
    ("Hyderabad", "16_1", "BOWENPALLY", "1609"),
    ("Hyderabad", "16_1", "CHARMINAR", "1608"),
    ("Hyderabad", "16_1", "CHIKKADPALLY", "1602"),
    ("Hyderabad", "16_1", "DOODHBOWLI", "1603"),
    ("Hyderabad", "16_1", "GOLCONDA", "1610"),
    ("Hyderabad", "16_1", "HYDERABAD (R.O)", "1607"),
    ("Hyderabad", "16_1", "MAREDPALLY", "1605"),
    ("Hyderabad", "16_1", "S.R.NAGAR", "1611"),
    ("Hyderabad", "16_1", "SECUNDERABAD", "1606"),
    ("Hyderabad", "16_1", "Azampura", "1601"),
];

#[derive(Debug, Deserialize)]
struct CatalogFile {
    partitions: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    sro_code: String,
    district_code: String,
    district: String,
    sro_name: String,
    #[serde(default = "default_state")]
    state: String,
}

fn default_state() -> String {
    STATE.to_string()
}

pub fn builtin() -> Vec<Partition> {
    OFFICES
        .iter()
        .map(|(district, district_code, office, code)| Partition {
            id: PartitionId::from(*code),
            district_code: (*district_code).to_string(),
            district: (*district).to_string(),
            display_name: (*office).to_string(),
            state: STATE.to_string(),
        })
        .collect()
}

/// Read a YAML catalog of the form `partitions: [{sro_code, district_code, district, sro_name}]`.
pub fn load(path: &Path) -> Result<Vec<Partition>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read partition catalog {}", path.display()))?;
    let file: CatalogFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse partition catalog {}", path.display()))?;

    let mut partitions = Vec::with_capacity(file.partitions.len());
    for entry in file.partitions {
        if entry.sro_code.trim().is_empty() || entry.district_code.trim().is_empty() {
            bail!("catalog entry {:?} needs both sro_code and district_code", entry.sro_name);
        }
        partitions.push(Partition {
            id: PartitionId::new(entry.sro_code.trim()),
            district_code: entry.district_code.trim().to_string(),
            district: entry.district,
            display_name: entry.sro_name,
            state: entry.state,
        });
    }
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn builtin_catalog_has_unique_codes_per_district() {
        let partitions = builtin();
        assert_eq!(partitions.len(), 29);
        let codes: BTreeSet<_> = partitions.iter().map(|partition| partition.id.clone()).collect();
        assert_eq!(codes.len(), partitions.len());
        assert_eq!(partitions.iter().filter(|partition| partition.district_code == "16_1").count(), 11);
    }

    #[test]
    fn yaml_catalog_defaults_the_state() -> Result<()> {
        let path = std::env::temp_dir().join(format!("deedsync-catalog-{}.yaml", ulid::Ulid::new()));
        fs::write(
            &path,
            "partitions:\n  - sro_code: \"9001\"\n    district_code: \"99_1\"\n    district: Test\n    sro_name: TEST OFFICE\n",
        )?;
        let partitions = load(&path)?;
        fs::remove_file(&path)?;

        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].id, PartitionId::from("9001"));
        assert_eq!(partitions[0].state, STATE);
        Ok(())
    }
}
