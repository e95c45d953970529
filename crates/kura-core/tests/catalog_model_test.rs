//! Integration tests for the catalog model.
//!
//! This test suite validates:
//! - Decoding marker-encoded catalog payloads
//! - Drafting, validating and finalizing records against the tag pool
//! - Ordering records by sort key
//! - Importing dumped records and finding duplicated unique values

use kura_core::validation::{check_record, check_stored_record, find_duplicated_values};
use kura_core::{
    import_dumped_record, sort_records, wire, CatalogData, DraftRecord, DraftTag, DraftValue,
    EntryConfiguration, EntryDefinition, EntryKind, EntryValue, Error, ImageRef,
    ItemInvalidReason, Record, SortingMethod, TagPool,
};

const PAYLOAD: &str = r#"{
    "protection": { "encrypted_counter": 7 },
    "configurations": {
        "global": { "theme": "dark" },
        "entry": {
            "image_size": { "width": 64, "height": 64 },
            "entries": [
                { "name": "title", "type": "string", "sorting_method": "as_string",
                  "optional": false, "unique": true },
                { "name": "genre", "type": "tag", "sorting_method": "disabled",
                  "optional": true, "exclusive": false },
                { "name": "score", "type": "rating", "sorting_method": "as_number",
                  "optional": true, "maximum_score": 3, "hints": ["meh", "good", "great"] }
            ]
        }
    },
    "images": { "pools": [ { "name": "pool-0", "bitmap": "base64://Aw==" } ] },
    "tags": ["map://", ["genre", ["jazz", "soul"]]],
    "data": ["map://",
        ["r1", { "image": { "name": "pool-0", "index": 0 },
                 "entries": ["map://",
                     ["title", { "value": "Blue Train" }],
                     ["genre", { "tags": [0] }],
                     ["score", { "score": 3, "comment": "classic" }]] }],
        ["r2", { "image": { "name": "pool-0", "index": 1 },
                 "entries": { "title": { "value": "Soul Station" }, "genre": { "tags": [1] } } }]
    ]
}"#;

fn payload() -> CatalogData {
    wire::decode(PAYLOAD).unwrap()
}

// ============================================================================
// Test Category 1: Payload Decoding
// ============================================================================

#[test]
fn test_payload_revives_markers() {
    let data = payload();

    assert_eq!(data.protection.encrypted_counter, 7);
    assert_eq!(data.configurations.global["theme"], "dark");
    assert!(data.entry_configuration().has_images());
    assert_eq!(data.entry_configuration().entries.len(), 3);

    let pools = data.images.as_ref().unwrap();
    assert_eq!(pools.pools[0].bitmap, vec![3]);
    assert!(pools.pools[0].is_allocated(0));
    assert!(pools.pools[0].is_allocated(1));
    assert!(!pools.pools[0].is_allocated(2));

    assert_eq!(data.tag_pool().tags("genre"), &["jazz", "soul"]);
    assert_eq!(data.data.len(), 2);
    assert_eq!(
        data.data["r1"].get("score"),
        Some(&EntryValue::rating(3, Some("classic".to_string())))
    );
    assert_eq!(
        data.data["r2"].get("title"),
        Some(&EntryValue::string("Soul Station"))
    );
}

#[test]
fn test_payload_survives_reencoding() {
    let data = payload();
    let text = wire::encode(&data).unwrap();
    assert!(text.contains("map://"));
    assert!(text.contains("base64://Aw=="));

    let again: CatalogData = wire::decode(&text).unwrap();
    assert_eq!(again, data);
}

#[test]
fn test_payload_rejects_broken_map() {
    let broken = PAYLOAD.replace(r#"["genre", ["jazz", "soul"]]"#, r#"["genre"]"#);
    assert!(matches!(
        wire::decode::<CatalogData>(&broken),
        Err(Error::Decode(_))
    ));
}

// ============================================================================
// Test Category 2: Drafting Records
// ============================================================================

#[test]
fn test_draft_to_record() {
    let mut data = payload();
    let draft = DraftRecord::new()
        .with_value("title", DraftValue::String("Moanin'".to_string()))
        .with_value(
            "genre",
            DraftValue::Tags(vec![
                DraftTag::New("hard bop".to_string()),
                DraftTag::Existing(0),
            ]),
        )
        .with_value(
            "score",
            DraftValue::Rating {
                score: 2,
                comment: "unused".to_string(),
                use_comment: false,
            },
        );
    let draft = DraftRecord {
        image: Some(ImageRef {
            name: "pool-0".to_string(),
            index: 2,
        }),
        ..draft
    };

    assert!(check_record(&draft, false, data.entry_configuration()).is_empty());

    let config = data.entry_configuration().clone();
    let record = draft.finalize(&config, data.tag_pool_mut());

    assert_eq!(data.tag_pool().tags("genre"), &["jazz", "soul", "hard bop"]);
    assert_eq!(record.get("genre"), Some(&EntryValue::tags(vec![0, 2])));
    assert_eq!(record.get("score"), Some(&EntryValue::rating(2, None)));
    assert!(check_stored_record(&record, &config).is_empty());
}

#[test]
fn test_draft_without_image_is_invalid() {
    let data = payload();
    let draft = DraftRecord::new().with_value("title", DraftValue::String("x".to_string()));

    let reasons = check_record(&draft, false, data.entry_configuration());
    assert_eq!(reasons, vec![ItemInvalidReason::Missing { key: None }]);
    assert!(check_record(&draft, true, data.entry_configuration()).is_empty());
}

// ============================================================================
// Test Category 3: Ordering
// ============================================================================

#[test]
fn test_sort_by_date_keeps_missing_last() {
    let released = EntryDefinition::string("released", SortingMethod::AsDate).with_optional(true);
    let data = CatalogData::new(EntryConfiguration::new(vec![released.clone()]))
        .with_record("a", Record::new().with_entry("released", EntryValue::string("1971-05-21")))
        .with_record("b", Record::new())
        .with_record("c", Record::new().with_entry("released", EntryValue::string("1958-01-15")))
        .with_record("d", Record::new().with_entry("released", EntryValue::string("2003-11-02")));
    let tags = data.tag_pool();

    assert_eq!(
        sort_records(&released, &data.data, &tags, false),
        vec!["c", "a", "d", "b"]
    );
    assert_eq!(
        sort_records(&released, &data.data, &tags, true),
        vec!["d", "a", "c", "b"]
    );
}

#[test]
fn test_sort_by_rating() {
    let data = payload();
    let score = data.entry_configuration().find("score").unwrap().clone();
    let order = sort_records(&score, &data.data, &data.tag_pool(), true);
    // r2 has no score
    assert_eq!(order, vec!["r1", "r2"]);
}

// ============================================================================
// Test Category 4: Import and Duplicates
// ============================================================================

#[test]
fn test_import_then_find_duplicates() {
    let mut data = payload();
    let config = data.entry_configuration().clone();

    let record = import_dumped_record(
        &config,
        r#"{"title":"Blue Train","genre":["jazz","modal"]}"#,
        data.tag_pool_mut(),
        true,
    )
    .unwrap();
    assert_eq!(data.tag_pool().tags("genre"), &["jazz", "soul", "modal"]);
    data.data.insert("r3".to_string(), record);

    let duplicates = find_duplicated_values(&config, &data.data);
    assert_eq!(duplicates.len(), 2);
    assert!(duplicates.contains_key("r1"));
    assert!(duplicates.contains_key("r3"));
    assert_eq!(duplicates["r3"][0].key(), Some("title"));
}

#[test]
fn test_import_without_image_fails() {
    let mut data = payload();
    let config = data.entry_configuration().clone();

    let result = import_dumped_record(&config, r#"{"title":"x"}"#, data.tag_pool_mut(), false);
    assert!(matches!(result, Err(Error::ImageNotFound)));
}

#[test]
fn test_unique_flag_read_from_payload() {
    let data = payload();
    let title = data.entry_configuration().find("title").unwrap();
    assert_eq!(title.kind, EntryKind::String { unique: true });
    assert!(TagPool::new().is_empty());
}
