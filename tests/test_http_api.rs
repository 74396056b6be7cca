//! End-to-end HTTP test over the real router:
//! 1) Register an admin and a university, log both in, verify the university.
//! 2) Upload a document, issue from its metadata hash, verify, revoke.
//! 3) One-shot issue-document, listings, search, stats and the auth failures.

mod common;

use common::{Harness, ADMIN_WALLET, STUDENT_WALLET};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
}

async fn register(client: &Client, base: &str, body: Value) -> Result<(StatusCode, Value), reqwest::Error> {
    let resp = client
        .post(format!("{}/api/institutions/register", base))
        .json(&body)
        .send()
        .await?;
    let status = resp.status();
    Ok((status, resp.json().await?))
}

async fn login(client: &Client, base: &str, email: &str) -> Result<String, Box<dyn std::error::Error>> {
    let resp = client
        .post(format!("{}/api/institutions/login", base))
        .json(&json!({ "email": email, "password": "Secret123" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;
    Ok(body["data"]["token"]
        .as_str()
        .ok_or("login response has no token")?
        .to_string())
}

fn certificate_form(student_id: &str, course: &str, content: &'static [u8]) -> Result<Form, reqwest::Error> {
    let file = Part::bytes(content)
        .file_name("diploma.pdf")
        .mime_str("application/pdf")?;
    Ok(Form::new()
        .part("certificate", file)
        .text("studentName", "Jane Doe")
        .text("studentId", student_id.to_string())
        .text("studentEmail", "jane@example.com")
        .text("courseName", course.to_string())
        .text("grade", "A")
        .text("certificateType", "Diploma")
        .text("graduationDate", "2024-06-30"))
}

/// Registers the admin and one university, verifies the university, returns its token.
async fn verified_university(client: &Client, base: &str) -> Result<String, Box<dyn std::error::Error>> {
    let (status, _) = register(
        client,
        base,
        json!({
            "name": "Registry Admin",
            "email": "admin@registry.test",
            "password": "Secret123",
            "walletAddress": ADMIN_WALLET,
            "registrationNumber": "ADMIN-1"
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = register(
        client,
        base,
        json!({
            "name": "State University",
            "email": "registrar@state.test",
            "password": "Secret123",
            "walletAddress": "0x52908400098527886E0F7030069857D2E4169EE7",
            "registrationNumber": "UNI-42",
            "contactInfo": { "website": "https://state.test" }
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    let university_id = body["data"]["institutionId"]
        .as_str()
        .ok_or("no institution id")?
        .to_string();
    assert_eq!(
        body["data"]["walletAddress"],
        "0x52908400098527886e0f7030069857d2e4169ee7"
    );

    let university = login(client, base, "registrar@state.test").await?;
    let admin = login(client, base, "admin@registry.test").await?;

    // Only admin wallets may verify.
    let resp = client
        .post(format!("{}/api/admin/institutions/{}/verify", base, university_id))
        .bearer_auth(&university)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = client
        .post(format!("{}/api/admin/institutions/{}/verify", base, university_id))
        .bearer_auth(&admin)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let me: Value = client
        .get(format!("{}/api/institutions/me", base))
        .bearer_auth(&university)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(me["data"]["isVerified"], true);
    assert_eq!(me["data"]["registrationNumber"], "UNI-42");
    assert!(me["data"].get("passwordHash").is_none());

    Ok(university)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_issue_verify_revoke_over_http() -> TestResult {
    let harness = Harness::new();
    let base = harness.serve().await;
    let client = client()?;
    let token = verified_university(&client, &base).await?;

    // --- Upload, then issue from the metadata hash ---
    let resp = client
        .post(format!("{}/api/certificates/upload", base))
        .bearer_auth(&token)
        .multipart(certificate_form("S1", "CS101", b"%PDF-1.4 diploma")?)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let uploaded: Value = resp.json().await?;
    let metadata_hash = uploaded["data"]["ipfsHash"]
        .as_str()
        .ok_or("no metadata hash")?
        .to_string();
    assert_eq!(
        uploaded["data"]["certificateData"]["institutionName"],
        "State University"
    );

    let issue_body = json!({
        "studentName": "Jane Doe",
        "studentId": "S1",
        "studentEmail": "jane@example.com",
        "courseName": "CS101",
        "grade": "A",
        "certificateType": "Diploma",
        "graduationDate": "2024-06-30",
        "studentWalletAddress": STUDENT_WALLET,
        "ipfsHash": metadata_hash
    });
    let resp = client
        .post(format!("{}/api/certificates/issue", base))
        .bearer_auth(&token)
        .json(&issue_body)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let issued: Value = resp.json().await?;
    let token_id = issued["data"]["tokenId"].as_u64().ok_or("no token id")?;
    assert_eq!(issued["data"]["transactionHash"], format!("sig-issue-{}", token_id));

    // Same student, course and institution again.
    let resp = client
        .post(format!("{}/api/certificates/issue", base))
        .bearer_auth(&token)
        .json(&issue_body)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(harness.ledger.certificate_count(), 1);

    // --- Public verification ---
    let verified: Value = client
        .get(format!("{}/api/certificates/verify/{}", base, token_id))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(verified["data"]["exists"], true);
    assert_eq!(verified["data"]["isRevoked"], false);
    assert_eq!(verified["data"]["graduationDate"], "2024-06-30T00:00:00Z");
    assert_eq!(verified["data"]["additionalInfo"]["certificateType"], "Diploma");

    let resp = client
        .get(format!("{}/api/certificates/verify/999", base))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = client
        .get(format!("{}/api/certificates/verify/abc", base))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let metadata: Value = client
        .get(format!("{}/api/certificates/metadata/{}", base, metadata_hash))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(
        metadata["data"]["properties"]["certificate_data"]["studentId"],
        "S1"
    );

    // --- Revocation ---
    let resp = client
        .post(format!("{}/api/certificates/revoke/{}", base, token_id))
        .bearer_auth(&token)
        .json(&json!({ "reason": "" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .post(format!("{}/api/certificates/revoke/{}", base, token_id))
        .bearer_auth(&token)
        .json(&json!({ "reason": "error" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .post(format!("{}/api/certificates/revoke/{}", base, token_id))
        .bearer_auth(&token)
        .json(&json!({ "reason": "error" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = resp.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["code"], "ALREADY_REVOKED");

    let verified: Value = client
        .get(format!("{}/api/certificates/verify/{}", base, token_id))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(verified["data"]["isRevoked"], true);
    assert_eq!(verified["data"]["revokeReason"], "error");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_issue_document_listings_and_search() -> TestResult {
    let harness = Harness::new();
    let base = harness.serve().await;
    let client = client()?;
    let token = verified_university(&client, &base).await?;

    let form = certificate_form("S9", "Data Science", b"\x89PNG certificate")?
        .text("studentWalletAddress", STUDENT_WALLET);
    let resp = client
        .post(format!("{}/api/certificates/issue-document", base))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let issued: Value = resp.json().await?;
    assert!(issued["data"]["fileHash"].is_string());

    let listed: Value = client
        .get(format!("{}/api/certificates/student/S9", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(listed["data"][0]["institutionName"], "State University");

    let mine: Value = client
        .get(format!("{}/api/certificates/institution", base))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(mine["data"].as_array().map(Vec::len), Some(1));

    let found: Value = client
        .get(format!("{}/api/certificates/search?query=data&type=course", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(found["data"].as_array().map(Vec::len), Some(1));

    let resp = client
        .get(format!("{}/api/certificates/search?query=", base))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await?;
    assert_eq!(body["data"]["code"], "VALIDATION_ERROR");
    assert!(body["data"]["details"]["query"].is_array());

    let stats: Value = client
        .get(format!("{}/api/stats", base))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(stats["data"]["totalCertificates"], 1);
    assert_eq!(stats["data"]["activeCertificates"], 1);

    // Text files are refused before anything is pinned.
    let text = Part::bytes(&b"not a certificate"[..])
        .file_name("notes.txt")
        .mime_str("text/plain")?;
    let resp = client
        .post(format!("{}/api/certificates/upload", base))
        .bearer_auth(&token)
        .multipart(Form::new().part("certificate", text))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_auth_and_registration_errors() -> TestResult {
    let harness = Harness::new();
    let base = harness.serve().await;
    let client = client()?;

    let resp = client.get(format!("{}/health", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let health: Value = resp.json().await?;
    assert_eq!(health["data"]["status"], "ok");

    let resp = client
        .get(format!("{}/api/institutions/me", base))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client
        .get(format!("{}/api/institutions/me", base))
        .bearer_auth("not-a-token")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = client
        .post(format!("{}/api/certificates/issue", base))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let registration = json!({
        "name": "Tech Institute",
        "email": "office@tech.test",
        "password": "Secret123",
        "walletAddress": "0xde709f2102306220921060314715629080e2fb77",
        "registrationNumber": "TI-7"
    });
    let (status, _) = register(&client, &base, registration.clone()).await?;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = register(&client, &base, registration).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["code"], "CONFLICT");

    // Missing fields fail body extraction; still a 400.
    let (status, body) = register(&client, &base, json!({ "name": "Only A Name" })).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = register(
        &client,
        &base,
        json!({
            "name": "X",
            "email": "not-an-email",
            "password": "weak",
            "walletAddress": "0x1234",
            "registrationNumber": "R"
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["code"], "VALIDATION_ERROR");

    let resp = client
        .post(format!("{}/api/institutions/login", base))
        .json(&json!({ "email": "office@tech.test", "password": "Wrong1234" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Registered but unverified: issuing is forbidden.
    let token = login(&client, &base, "office@tech.test").await?;
    let resp = client
        .post(format!("{}/api/certificates/upload", base))
        .bearer_auth(&token)
        .multipart(certificate_form("S1", "CS101", b"%PDF-1.4")?)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    Ok(())
}
