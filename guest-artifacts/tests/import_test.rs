mod common;

use axum::http::StatusCode;
use common::{RecordingSender, TestHarness, BUCKET, EVENT_ID};
use guest_artifacts::artifact::ArtifactState;
use guest_artifacts::guests::DeliveryChannel;
use guest_artifacts::import::{ImportNotification, RowStatus, SheetFormat, CSV_MEDIA_TYPE};
use tokio_util::sync::CancellationToken;

const GUESTS_CSV: &str = "\
Name,Table No,Others,Email
Ada Lovelace,1,2,ada@example.com
Bo Diddley,2,0,bo@example.com
,,,
Cy Twombly,4,1,
Di Fossey,,,di@example.com
";

#[tokio::test]
async fn test_import_skips_blank_rows() {
    let harness = TestHarness::new();

    let report = harness
        .ctx
        .importer
        .import(
            EVENT_ID,
            SheetFormat::Csv,
            GUESTS_CSV.as_bytes(),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.imported, 4);
    assert_eq!(report.failed, 0);
    assert_eq!(report.processed(), 4);

    let rows: Vec<(usize, RowStatus)> = report.rows.iter().map(|r| (r.row, r.status)).collect();
    assert_eq!(
        rows,
        vec![
            (1, RowStatus::Imported),
            (2, RowStatus::Imported),
            (3, RowStatus::Skipped),
            (4, RowStatus::Imported),
            (5, RowStatus::Imported),
        ]
    );

    let guests = harness.guests.guests_for_event(EVENT_ID);
    assert_eq!(guests.len(), 4);
    assert!(guests
        .iter()
        .all(|g| g.artifact_state == ArtifactState::Stored));

    let di = guests.iter().find(|g| g.name == "Di Fossey").unwrap();
    assert_eq!(di.table_no, "0");
    assert_eq!(di.others, "0");

    // one vector per imported guest, nothing rasterized yet
    let keys = harness.stored_keys();
    assert_eq!(keys.len(), 4);
    assert!(keys.iter().all(|k| k.ends_with(".svg")));
    for guest in &guests {
        let vector = harness.ctx.artifacts.keys_for(guest).vector;
        assert!(harness.s3.object(BUCKET, &vector).is_some());
    }
    assert!(harness.email.sent().is_empty());
}

#[tokio::test]
async fn test_import_counts_empty_lines_as_skipped_rows() {
    let harness = TestHarness::new();
    let csv = "Name,Table No\nAda,1\nBo,2\n\nCy,4\nDi,5\n";

    let report = harness
        .ctx
        .importer
        .import(
            EVENT_ID,
            SheetFormat::Csv,
            csv.as_bytes(),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.imported, 4);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.imported + report.failed + report.skipped, report.total);
    let rows: Vec<(usize, RowStatus)> = report.rows.iter().map(|r| (r.row, r.status)).collect();
    assert_eq!(
        rows,
        vec![
            (1, RowStatus::Imported),
            (2, RowStatus::Imported),
            (3, RowStatus::Skipped),
            (4, RowStatus::Imported),
            (5, RowStatus::Imported),
        ]
    );
    assert_eq!(report.rows[2].reason.as_deref(), Some("blank row"));
}

#[tokio::test]
async fn test_import_row_without_name_is_skipped() {
    let harness = TestHarness::new();
    let csv = "name,table\n,5\nEve,6\n";

    let report = harness
        .ctx
        .importer
        .import(
            EVENT_ID,
            SheetFormat::Csv,
            csv.as_bytes(),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.imported, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.rows[0].reason.as_deref(), Some("missing name"));
}

#[tokio::test]
async fn test_import_without_name_column_fails() {
    let harness = TestHarness::new();

    let result = harness
        .ctx
        .importer
        .import(
            EVENT_ID,
            SheetFormat::Csv,
            b"table,email\n1,a@example.com\n",
            None,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.is_err());
    assert!(harness.guests.guests_for_event(EVENT_ID).is_empty());
}

#[tokio::test]
async fn test_import_notifies_guests() {
    let email = RecordingSender::failing_for(DeliveryChannel::Email, "bo@example.com");
    let harness = TestHarness::builder().with_email(email.clone()).build();

    let report = harness
        .ctx
        .importer
        .import(
            EVENT_ID,
            SheetFormat::Csv,
            GUESTS_CSV.as_bytes(),
            Some(ImportNotification {
                channel: DeliveryChannel::Email,
                template_id: "welcome".to_string(),
            }),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    // send failures never fail the import itself
    assert_eq!(report.imported, 4);
    let notified: Vec<bool> = report
        .rows
        .iter()
        .filter(|r| r.status == RowStatus::Imported)
        .map(|r| r.notified)
        .collect();
    assert_eq!(notified, vec![true, false, false, true]);
    assert!(report.rows[3]
        .reason
        .as_deref()
        .unwrap()
        .contains("no email address"));

    let mut recipients: Vec<String> = email.sent().into_iter().map(|m| m.recipient).collect();
    recipients.sort();
    assert_eq!(recipients, vec!["ada@example.com", "di@example.com"]);
    assert!(email.sent().iter().all(|m| m.template_id == "welcome"));

    // every attempt is on record, failures included
    assert_eq!(harness.guests.deliveries().len(), 4);
}

#[tokio::test]
async fn test_import_endpoint() {
    let harness = TestHarness::new();

    let response = harness
        .post_bytes(
            &format!("/api/events/{EVENT_ID}/guests/import"),
            &format!("{CSV_MEDIA_TYPE}; charset=utf-8"),
            GUESTS_CSV.as_bytes(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = TestHarness::body_json(response).await;
    assert_eq!(body["total"], 5);
    assert_eq!(body["imported"], 4);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["rows"][2]["status"], "skipped");
}

#[tokio::test]
async fn test_import_endpoint_rejects_unknown_content_type() {
    let harness = TestHarness::new();

    let response = harness
        .post_bytes(
            &format!("/api/events/{EVENT_ID}/guests/import"),
            "application/pdf",
            b"%PDF-1.7",
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_import_endpoint_requires_template_with_notify() {
    let harness = TestHarness::new();

    let response = harness
        .post_bytes(
            &format!("/api/events/{EVENT_ID}/guests/import?notify=email"),
            CSV_MEDIA_TYPE,
            GUESTS_CSV.as_bytes(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(harness.guests.guests_for_event(EVENT_ID).is_empty());
}

#[tokio::test]
async fn test_import_endpoint_with_nothing_to_import() {
    let harness = TestHarness::new();

    // only blank rows, then only a header
    for csv in ["Name,Table No\n,\n\n,\n", "Name,Table No\n"] {
        let response = harness
            .post_bytes(
                &format!("/api/events/{EVENT_ID}/guests/import"),
                CSV_MEDIA_TYPE,
                csv.as_bytes(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body: serde_json::Value = TestHarness::body_json(response).await;
        assert_eq!(body["code"], 422);
        assert_eq!(body["imported"], 0);
        assert_eq!(body["total"], body["skipped"]);
    }
    assert!(harness.guests.guests_for_event(EVENT_ID).is_empty());
    assert!(harness.stored_keys().is_empty());
}
