use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Catalog bundled with the binary, used when no `--stations` file is given.
const BUNDLED_CATALOG: &str = include_str!("data/stations.json");

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genre: String,
    #[serde(rename = "streamUrl")]
    pub stream_url: String,
}

/// Station records grouped under named lists. A catalog file looks like:
/// `{ "lists": { "default": [ { "id": ..., "name": ... }, ... ] } }`
#[derive(Debug, Deserialize)]
struct CatalogFile {
    lists: HashMap<String, Vec<Station>>,
}

pub fn load_bundled(list: &str) -> Result<Vec<Station>> {
    parse_catalog(BUNDLED_CATALOG, list)
}

pub fn load_file(path: &Path, list: &str) -> Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read station catalog {}", path.display()))?;
    parse_catalog(&content, list)
}

fn parse_catalog(content: &str, list: &str) -> Result<Vec<Station>> {
    let file: CatalogFile =
        serde_json::from_str(content).context("failed to parse station catalog")?;
    file.lists
        .get(list)
        .cloned()
        .with_context(|| format!("no station list named {:?} in catalog", list))
}

/// Distinct genres in first-seen order. Empty genre tags are skipped.
pub fn genres(stations: &[Station]) -> Vec<String> {
    let mut seen = Vec::new();
    for station in stations {
        if !station.genre.is_empty() && !seen.contains(&station.genre) {
            seen.push(station.genre.clone());
        }
    }
    seen
}

/// Filter the catalog by exact genre (empty selector matches all) and a
/// case-insensitive substring on the station name. Order-preserving.
pub fn filter_stations<'a>(stations: &'a [Station], genre: &str, query: &str) -> Vec<&'a Station> {
    let query = query.to_lowercase();
    stations
        .iter()
        .filter(|s| genre.is_empty() || s.genre == genre)
        .filter(|s| query.is_empty() || s.name.to_lowercase().contains(&query))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Station> {
        vec![
            Station {
                id: "1".to_string(),
                name: "Jazz FM".to_string(),
                genre: "Jazz".to_string(),
                stream_url: "http://example.com/jazz.mp3".to_string(),
            },
            Station {
                id: "2".to_string(),
                name: "Rock Hits".to_string(),
                genre: "Rock".to_string(),
                stream_url: "http://example.com/rock.mp3".to_string(),
            },
            Station {
                id: "3".to_string(),
                name: "Smooth Jazz Cafe".to_string(),
                genre: "Jazz".to_string(),
                stream_url: "http://example.com/smooth.mp3".to_string(),
            },
        ]
    }

    #[test]
    fn identity_filter_returns_catalog_in_order() {
        let stations = catalog();
        let visible = filter_stations(&stations, "", "");
        let ids: Vec<&str> = visible.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn search_is_case_insensitive() {
        let stations = catalog();
        let visible = filter_stations(&stations, "", "jazz");
        let names: Vec<&str> = visible.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Jazz FM", "Smooth Jazz Cafe"]);
    }

    #[test]
    fn genre_and_search_compose_by_conjunction() {
        let stations = catalog();
        let visible = filter_stations(&stations, "Jazz", "cafe");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "3");
        // Every result satisfies both predicates
        for s in visible {
            assert_eq!(s.genre, "Jazz");
            assert!(s.name.to_lowercase().contains("cafe"));
        }
    }

    #[test]
    fn genre_filter_is_exact_match() {
        let stations = catalog();
        let visible = filter_stations(&stations, "Rock", "");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "Rock Hits");
        assert!(filter_stations(&stations, "Roc", "").is_empty());
    }

    #[test]
    fn filter_result_is_subset() {
        let stations = catalog();
        let visible = filter_stations(&stations, "Jazz", "fm");
        for s in &visible {
            assert!(stations.iter().any(|c| c.id == s.id));
        }
    }

    #[test]
    fn genres_are_distinct_first_seen() {
        let stations = catalog();
        assert_eq!(genres(&stations), vec!["Jazz", "Rock"]);
    }

    #[test]
    fn empty_catalog_filters_to_empty() {
        assert!(filter_stations(&[], "", "anything").is_empty());
        assert!(genres(&[]).is_empty());
    }

    #[test]
    fn bundled_catalog_parses() {
        let stations = load_bundled("default").unwrap();
        assert!(!stations.is_empty());
        for s in &stations {
            assert!(!s.id.is_empty());
            assert!(s.stream_url.starts_with("http"));
        }
    }

    #[test]
    fn named_list_selection() {
        let chill = load_bundled("chill").unwrap();
        assert!(!chill.is_empty());
        assert!(load_bundled("does-not-exist").is_err());
    }
}
