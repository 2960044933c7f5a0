//! Search-parameter behavior across the HTTP surface: token system/code
//! forms, string modifiers, quantity prefixes, includes, sort, and result
//! controls.

mod common;

use axum::http::StatusCode;
use serde_json::{Value, json};

use common::{send, start_default};

async fn seed_observation(server: &common::TestServer, id: &str, code: &str, value: f64) {
    let (status, _) = send(
        server,
        "PUT",
        &format!("/fhir/demo/Observation/{id}"),
        Some(&json!({
            "resourceType": "Observation",
            "id": id,
            "status": "final",
            "code": {"coding": [{"system": "http://loinc.org", "code": code}]},
            "valueQuantity": {"value": value, "unit": "mg"},
            "subject": {"reference": "Patient/p1"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

fn entry_ids(bundle: &Value) -> Vec<String> {
    bundle["entry"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["resource"]["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn token_search_by_system_and_code() {
    let server = start_default();
    seed_observation(&server, "o1", "1234-5", 1.0).await;
    seed_observation(&server, "o2", "9999-9", 2.0).await;

    let (status, bundle) = send(
        &server,
        "GET",
        "/fhir/demo/Observation?code=http%3A%2F%2Floinc.org%7C1234-5",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry_ids(&bundle), vec!["o1"]);

    // Bare code matches regardless of system.
    let (_, bundle) = send(&server, "GET", "/fhir/demo/Observation?code=9999-9", None).await;
    assert_eq!(entry_ids(&bundle), vec!["o2"]);

    // Wrong system excludes.
    let (_, bundle) = send(
        &server,
        "GET",
        "/fhir/demo/Observation?code=http%3A%2F%2Fsnomed.info%7C1234-5",
        None,
    )
    .await;
    assert!(entry_ids(&bundle).is_empty());
}

#[tokio::test]
async fn string_search_prefix_and_exact() {
    let server = start_default();
    for (id, family) in [("p1", "Smith"), ("p2", "Smythe"), ("p3", "Jones")] {
        send(
            &server,
            "PUT",
            &format!("/fhir/demo/Patient/{id}"),
            Some(&json!({"resourceType": "Patient", "id": id, "name": [{"family": family}]})),
        )
        .await;
    }

    // Default: case-insensitive prefix.
    let (_, bundle) = send(&server, "GET", "/fhir/demo/Patient?family=smi", None).await;
    assert_eq!(entry_ids(&bundle), vec!["p1"]);
    let (_, bundle) = send(&server, "GET", "/fhir/demo/Patient?family=SM", None).await;
    assert_eq!(entry_ids(&bundle), vec!["p1", "p2"]);

    // :exact is case-sensitive full match.
    let (_, bundle) = send(&server, "GET", "/fhir/demo/Patient?family:exact=Smith", None).await;
    assert_eq!(entry_ids(&bundle), vec!["p1"]);
    let (_, bundle) = send(&server, "GET", "/fhir/demo/Patient?family:exact=smith", None).await;
    assert!(entry_ids(&bundle).is_empty());
}

#[tokio::test]
async fn missing_and_not_modifiers() {
    let server = start_default();
    send(
        &server,
        "PUT",
        "/fhir/demo/Patient/with-name",
        Some(&json!({"resourceType": "Patient", "id": "with-name", "name": [{"family": "X"}], "gender": "female"})),
    )
    .await;
    send(
        &server,
        "PUT",
        "/fhir/demo/Patient/anonymous",
        Some(&json!({"resourceType": "Patient", "id": "anonymous", "gender": "male"})),
    )
    .await;

    let (_, bundle) = send(&server, "GET", "/fhir/demo/Patient?family:missing=true", None).await;
    assert_eq!(entry_ids(&bundle), vec!["anonymous"]);
    let (_, bundle) = send(&server, "GET", "/fhir/demo/Patient?family:missing=false", None).await;
    assert_eq!(entry_ids(&bundle), vec!["with-name"]);

    let (_, bundle) = send(&server, "GET", "/fhir/demo/Patient?gender:not=male", None).await;
    assert_eq!(entry_ids(&bundle), vec!["with-name"]);
}

#[tokio::test]
async fn quantity_prefixes_bound_the_value() {
    let server = start_default();
    seed_observation(&server, "low", "x", 2.0).await;
    seed_observation(&server, "mid", "x", 5.0).await;
    seed_observation(&server, "high", "x", 9.0).await;

    let (_, bundle) = send(
        &server,
        "GET",
        "/fhir/demo/Observation?value-quantity=gt4",
        None,
    )
    .await;
    assert_eq!(entry_ids(&bundle), vec!["high", "mid"]);

    let (_, bundle) = send(
        &server,
        "GET",
        "/fhir/demo/Observation?value-quantity=le2",
        None,
    )
    .await;
    assert_eq!(entry_ids(&bundle), vec!["low"]);

    // ap widens by ten percent.
    let (_, bundle) = send(
        &server,
        "GET",
        "/fhir/demo/Observation?value-quantity=ap5.2",
        None,
    )
    .await;
    assert_eq!(entry_ids(&bundle), vec!["mid"]);
}

#[tokio::test]
async fn revinclude_and_include_compose() {
    let server = start_default();
    send(
        &server,
        "PUT",
        "/fhir/demo/Patient/p1",
        Some(&json!({"resourceType": "Patient", "id": "p1", "name": [{"family": "Root"}]})),
    )
    .await;
    seed_observation(&server, "o1", "z", 1.0).await;

    let (_, bundle) = send(
        &server,
        "GET",
        "/fhir/demo/Patient?family=Root&_revinclude=Observation:patient",
        None,
    )
    .await;
    let entries = bundle["entry"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["search"]["mode"], "match");
    assert_eq!(entries[1]["search"]["mode"], "include");

    let (_, bundle) = send(
        &server,
        "GET",
        "/fhir/demo/Observation?code=z&_include=Observation:patient",
        None,
    )
    .await;
    let ids = entry_ids(&bundle);
    assert!(ids.contains(&"o1".to_string()));
    assert!(ids.contains(&"p1".to_string()));
}

#[tokio::test]
async fn sort_and_result_controls() {
    let server = start_default();
    for (id, family) in [("a", "Zorn"), ("b", "Adams"), ("c", "Miller")] {
        send(
            &server,
            "PUT",
            &format!("/fhir/demo/Patient/{id}"),
            Some(&json!({"resourceType": "Patient", "id": id, "name": [{"family": family}],
                "text": {"status": "generated", "div": "<div>n</div>"}})),
        )
        .await;
    }

    let (_, bundle) = send(&server, "GET", "/fhir/demo/Patient?_sort=family", None).await;
    assert_eq!(entry_ids(&bundle), vec!["b", "c", "a"]);

    let (_, bundle) = send(&server, "GET", "/fhir/demo/Patient?_sort=-family", None).await;
    assert_eq!(entry_ids(&bundle), vec!["a", "c", "b"]);

    let (_, bundle) = send(
        &server,
        "GET",
        "/fhir/demo/Patient?_total=accurate&_count=2",
        None,
    )
    .await;
    assert_eq!(bundle["total"], 3);
    assert_eq!(bundle["entry"].as_array().unwrap().len(), 2);

    let (_, bundle) = send(&server, "GET", "/fhir/demo/Patient?_summary=text", None).await;
    let resource = &bundle["entry"][0]["resource"];
    assert!(resource.get("text").is_some());
    assert!(resource.get("name").is_none());

    let (_, bundle) = send(&server, "GET", "/fhir/demo/Patient?_summary=data", None).await;
    let resource = &bundle["entry"][0]["resource"];
    assert!(resource.get("text").is_none());
    assert!(resource.get("name").is_some());
}

#[tokio::test]
async fn unsupported_modifier_is_rejected() {
    let server = start_default();
    let (status, outcome) = send(
        &server,
        "GET",
        "/fhir/demo/Patient?family:contains=mit",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(outcome["resourceType"], "OperationOutcome");
    assert_eq!(outcome["issue"].as_array().unwrap().len(), 1);
}
