//! Canned inputs shared by the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};

/// Store master file in the layout the service ships with.
pub const STORE_MASTER_CSV: &str = "\
AreaCode,StoreName,StoreID
7100001,\"Store, One\",RP00001
7100002,Store Two,RP00002
7100003,Store Three,RP00003
";

/// A two-visit submission whose `count` matches.
pub fn submission(image_urls: &[&str]) -> Value {
    json!({
        "count": 2,
        "visits": [
            {
                "store_id": "RP00001",
                "image_url": image_urls,
                "visit_time": "2024-01-01T10:00:00"
            },
            {
                "store_id": "RP00002",
                "image_url": image_urls,
                "visit_time": "2024-01-01T11:00:00"
            }
        ]
    })
}

/// A single visit to a store missing from the store master.
pub fn unknown_store_submission(image_url: &str) -> Value {
    json!({
        "count": 1,
        "visits": [
            {
                "store_id": "RP99999",
                "image_url": [image_url],
                "visit_time": "2024-01-01T10:00:00"
            }
        ]
    })
}
