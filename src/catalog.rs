//! Traversal of the Landsat Collection 2 STAC catalog.
use crate::error::CatalogError;
use anyhow::{anyhow, Result};
use regex::Regex;
use serde_json::Value;
use stac::{Item, ItemCollection, Link};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Platform codes in the export, oldest first. The letter pair encodes the sensor
/// (LM = MSS, LT = TM, LE = ETM+, LC = OLI/TIRS), the digits the spacecraft.
pub const PLATFORMS: [&str; 9] = [
    "LM01", "LM02", "LM03", "LM04", "LT04", "LT05", "LE07", "LC08", "LC09",
];

pub const TIERS: [&str; 2] = ["T1", "T2"];

/// One (platform, tier) pair of the export source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub platform: String,
    pub tier: String,
}

impl Collection {
    pub fn all() -> Vec<Self> {
        PLATFORMS
            .iter()
            .flat_map(|platform| {
                TIERS.iter().map(|tier| Self {
                    platform: platform.to_string(),
                    tier: tier.to_string(),
                })
            })
            .collect()
    }

    /// Spacecraft name as the catalog reports it, e.g. `LANDSAT_8` for `LC08`.
    pub fn spacecraft_id(self: &Self) -> Result<String> {
        spacecraft_id(&self.platform)
    }

    pub fn search_body(self: &Self, collection: &str, limit: u32) -> Result<Value> {
        Ok(serde_json::json!({
            "collections": [collection],
            "limit": limit,
            "query": {
                "platform": {"eq": self.spacecraft_id()?},
                "landsat:collection_category": {"eq": self.tier},
            },
        }))
    }

    /// Searches by spacecraft, so the sensor is checked against the product id.
    pub fn contains(self: &Self, item: &Item) -> bool {
        item.id.starts_with(&self.platform)
    }
}

pub fn spacecraft_id(platform: &str) -> Result<String> {
    let number: u8 = platform
        .get(2..4)
        .and_then(|digits| digits.parse().ok())
        .ok_or(anyhow!("Invalid platform code: {}", platform))?;
    Ok(format!("LANDSAT_{}", number))
}

/// Fields encoded in a Landsat product id such as
/// `LC08_L1TP_044034_20200101_20200113_02_T1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductId {
    pub platform: String,
    pub level: String,
    pub wrs_path: u16,
    pub wrs_row: u16,
    /// `YYYY-MM-DD`
    pub date_acquired: String,
    pub date_processed: String,
    pub collection: String,
    pub tier: String,
}

fn product_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?<platform>L[CEMOT]\d{2})_(?<level>[A-Z0-9]{4})_(?<path>\d{3})(?<row>\d{3})_(?<acquired>\d{8})_(?<processed>\d{8})_(?<collection>\d{2})_(?<tier>T1|T2|RT)(?:_\w+)?$",
        )
        .expect("Regex pattern should always compile")
    })
}

impl ProductId {
    pub fn parse(id: &str) -> Result<Self, CatalogError> {
        let captures = product_id_regex()
            .captures(id)
            .ok_or(CatalogError::InvalidProductId(id.to_string()))?;
        let (_, [platform, level, path, row, acquired, processed, collection, tier]) =
            captures.extract();

        let invalid = || CatalogError::InvalidProductId(id.to_string());
        Ok(Self {
            platform: platform.to_string(),
            level: level.to_string(),
            wrs_path: path.parse().map_err(|_| invalid())?,
            wrs_row: row.parse().map_err(|_| invalid())?,
            date_acquired: format!("{}-{}-{}", &acquired[..4], &acquired[4..6], &acquired[6..]),
            date_processed: processed.to_string(),
            collection: collection.to_string(),
            tier: tier.to_string(),
        })
    }
}

pub fn property_f64(item: &Item, key: &str) -> Option<f64> {
    item.properties.additional_fields.get(key)?.as_f64()
}

pub fn property_str<'a>(item: &'a Item, key: &str) -> Option<&'a str> {
    item.properties.additional_fields.get(key)?.as_str()
}

/// The request that fetches the page after `page`, if there is one.
#[derive(Debug, Clone, PartialEq)]
enum NextPage {
    Get(String),
    Post { href: String, body: Value },
}

fn next_page(links: &[Link], previous_body: &Value) -> Option<NextPage> {
    let link = links.iter().find(|l| l.rel == "next")?;
    let is_post = link
        .method
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case("POST"));
    if !is_post {
        return Some(NextPage::Get(link.href.to_owned()));
    }
    let body = match (&link.body, link.merge.unwrap_or(false)) {
        (Some(body), true) => {
            let mut merged = previous_body.as_object().cloned().unwrap_or_default();
            merged.extend(body.clone());
            Value::Object(merged)
        }
        (Some(body), false) => Value::Object(body.clone()),
        (None, _) => previous_body.clone(),
    };
    Some(NextPage::Post {
        href: link.href.to_owned(),
        body,
    })
}

pub struct Catalog {
    client: reqwest::Client,
    search_url: String,
    collection: String,
    page_size: u32,
}

impl Catalog {
    pub fn new(search_url: &str, collection: &str, page_size: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            search_url: search_url.to_string(),
            collection: collection.to_string(),
            page_size,
        }
    }

    async fn fetch(self: &Self, request: &NextPage) -> Result<ItemCollection> {
        let request = match request {
            NextPage::Get(href) => self.client.get(href),
            NextPage::Post { href, body } => self.client.post(href).json(body),
        };
        let page = request.send().await?.error_for_status()?.json().await?;
        Ok(page)
    }

    /// Hands every item of one (platform, tier) pair to `visit`, one page at a time,
    /// following `next` links to the end. Returns the number of items visited.
    pub async fn search<F>(self: &Self, collection: &Collection, mut visit: F) -> Result<usize>
    where
        F: FnMut(&Item) -> Result<()>,
    {
        let mut request = NextPage::Post {
            href: self.search_url.to_owned(),
            body: collection.search_body(&self.collection, self.page_size)?,
        };
        let mut count = 0;
        loop {
            let page = self.fetch(&request).await?;
            debug!(count = page.items.len(), "Fetched search page");
            for item in page.items.iter().filter(|item| collection.contains(item)) {
                visit(item)?;
                count += 1;
            }

            let previous_body = match &request {
                NextPage::Post { body, .. } => body.clone(),
                NextPage::Get(_) => Value::Null,
            };
            match next_page(&page.links, &previous_body) {
                Some(next) => request = next,
                None => break,
            }
        }
        info!(
            platform = %collection.platform,
            tier = %collection.tier,
            count,
            "Visited catalog items"
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collections() {
        let all = Collection::all();
        assert_eq!(all.len(), 18);
        assert_eq!(all[0].platform, "LM01");
        assert_eq!(all[0].tier, "T1");
        assert_eq!(all[17].platform, "LC09");
        assert_eq!(all[17].tier, "T2");
    }

    #[test]
    fn test_spacecraft_id() {
        assert_eq!(spacecraft_id("LM01").unwrap(), "LANDSAT_1");
        assert_eq!(spacecraft_id("LT04").unwrap(), "LANDSAT_4");
        assert_eq!(spacecraft_id("LC09").unwrap(), "LANDSAT_9");
        assert!(spacecraft_id("L").is_err());
    }

    #[test]
    fn test_search_body() {
        let collection = Collection {
            platform: "LE07".to_string(),
            tier: "T2".to_string(),
        };
        let body = collection.search_body("landsat-c2l1", 250).unwrap();
        assert_eq!(body["collections"][0], "landsat-c2l1");
        assert_eq!(body["limit"], 250);
        assert_eq!(body["query"]["platform"]["eq"], "LANDSAT_7");
        assert_eq!(body["query"]["landsat:collection_category"]["eq"], "T2");
    }

    #[test]
    fn test_parse_product_id() {
        let id = ProductId::parse("LC08_L1TP_044034_20200101_20200113_02_T1").unwrap();
        assert_eq!(id.platform, "LC08");
        assert_eq!(id.level, "L1TP");
        assert_eq!(id.wrs_path, 44);
        assert_eq!(id.wrs_row, 34);
        assert_eq!(id.date_acquired, "2020-01-01");
        assert_eq!(id.tier, "T1");

        let id = ProductId::parse("LM01_L1GS_033028_19720726_20200909_02_T2").unwrap();
        assert_eq!(id.date_acquired, "1972-07-26");
        assert_eq!(id.wrs_path, 33);
    }

    #[test]
    fn test_reject_malformed_product_id() {
        assert!(ProductId::parse("S2A_MSIL2A_20240504T195901_N0510_R128_T08VPH").is_err());
        assert!(ProductId::parse("LC08_L1TP_04403_20200101_20200113_02_T1").is_err());
        assert!(ProductId::parse("").is_err());
    }

    #[test]
    fn test_sensor_filter() {
        let mss = Collection {
            platform: "LM04".to_string(),
            tier: "T1".to_string(),
        };
        assert!(mss.contains(&Item::new("LM04_L1GS_033028_19830101_20200909_02_T1")));
        assert!(!mss.contains(&Item::new("LT04_L1TP_033028_19830101_20200909_02_T1")));
    }

    #[test]
    fn test_parse_search_page() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "stac_version": "1.0.0",
                "id": "LC08_L1TP_044034_20200101_20200113_02_T1",
                "geometry": {"type": "Polygon", "coordinates": [[[-122, 37], [-120, 37], [-120, 39], [-122, 39], [-122, 37]]]},
                "properties": {
                    "datetime": "2020-01-01T18:47:37Z",
                    "eo:cloud_cover": 12.5,
                    "view:sun_elevation": 24.1,
                    "landsat:collection_category": "T1"
                },
                "links": [],
                "assets": {}
            }],
            "links": [{
                "rel": "next",
                "href": "https://example.com/search",
                "method": "POST",
                "body": {"next": "token-2"},
                "merge": true
            }]
        }"#;
        let page: ItemCollection = serde_json::from_str(json).unwrap();
        assert_eq!(page.items.len(), 1);
        let item = &page.items[0];
        assert_eq!(property_f64(item, "eo:cloud_cover"), Some(12.5));
        assert_eq!(property_str(item, "landsat:collection_category"), Some("T1"));
        assert_eq!(property_f64(item, "landsat:cloud_cover_land"), None);
        assert!(item.geometry.is_some());

        let previous = serde_json::json!({"collections": ["landsat-c2l1"], "limit": 500});
        match next_page(&page.links, &previous).unwrap() {
            NextPage::Post { href, body } => {
                assert_eq!(href, "https://example.com/search");
                assert_eq!(body["next"], "token-2");
                assert_eq!(body["limit"], 500);
            }
            other => panic!("Expected a POST request, got {other:?}"),
        }
    }

    #[test]
    fn test_next_page_variants() {
        let get: Vec<Link> = serde_json::from_str(
            r#"[{"rel": "self", "href": "https://example.com/a"},
                {"rel": "next", "href": "https://example.com/search?token=abc"}]"#,
        )
        .unwrap();
        assert_eq!(
            next_page(&get, &Value::Null),
            Some(NextPage::Get("https://example.com/search?token=abc".to_string()))
        );

        let replace: Vec<Link> = serde_json::from_str(
            r#"[{"rel": "next", "href": "https://example.com/search", "method": "POST", "body": {"next": "t"}}]"#,
        )
        .unwrap();
        let previous = serde_json::json!({"limit": 500});
        assert_eq!(
            next_page(&replace, &previous),
            Some(NextPage::Post {
                href: "https://example.com/search".to_string(),
                body: serde_json::json!({"next": "t"}),
            })
        );

        let last: Vec<Link> =
            serde_json::from_str(r#"[{"rel": "self", "href": "https://example.com/a"}]"#).unwrap();
        assert_eq!(next_page(&last, &previous), None);
    }
}
