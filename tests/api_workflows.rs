use anyhow::{Context, Result, ensure};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use eduresolve::{
    api::{
        self,
        blobs::MemoryBlobStore,
        email::RecordingMailSender,
        handlers::auth::TokenCodec,
        state::{AppConfig, AppState},
    },
    store::MemoryStore,
};
use image::{ImageFormat, Rgb, RgbImage};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::{io::Cursor, sync::Arc};
use tower::ServiceExt;

const PASSWORD: &str = "correct horse";
const BOUNDARY: &str = "eduresolve-test-boundary";
const FRONTEND: &str = "http://localhost:5173";

struct TestApp {
    router: Router,
    mailer: Arc<RecordingMailSender>,
}

#[derive(Clone, Debug)]
struct Session {
    id: String,
    token: String,
}

struct Reply {
    status: StatusCode,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).unwrap_or(Value::Null)
    }

    fn message(&self) -> String {
        self.json()["message"].as_str().unwrap_or_default().to_string()
    }
}

impl TestApp {
    /// Application with a report threshold of two.
    fn new() -> Result<Self> {
        Self::with_config(AppConfig::new(FRONTEND.to_string()).with_report_threshold(2))
    }

    fn with_config(config: AppConfig) -> Result<Self> {
        let mailer = Arc::new(RecordingMailSender::new());
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlobStore::new()),
            mailer.clone(),
            TokenCodec::new(&SecretString::from("integration-secret".to_string())),
            config,
        );
        Ok(Self {
            router: api::app(Arc::new(state))?,
            mailer,
        })
    }

    async fn send(&self, request: Request<Body>) -> Result<Reply> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await?.to_vec();
        Ok(Reply {
            status,
            content_type,
            bytes,
        })
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        session: Option<&Session>,
        body: Option<Value>,
    ) -> Result<Reply> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(session) = session {
            builder = builder
                .header(header::AUTHORIZATION, format!("Bearer {}", session.token))
                .header("x-account-id", &session.id);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };
        self.send(request).await
    }

    async fn register(&self, role: &str, body: Value) -> Result<Reply> {
        self.call(
            Method::PUT,
            &format!("/v1/accounts/{role}/register"),
            None,
            Some(body),
        )
        .await
    }

    async fn try_login(&self, role: &str, phone: &str, password: &str) -> Result<Reply> {
        self.call(
            Method::POST,
            &format!("/v1/accounts/{role}/login"),
            None,
            Some(json!({ "phoneNumber": phone, "password": password })),
        )
        .await
    }

    async fn login(&self, role: &str, phone: &str) -> Result<Session> {
        let reply = self.try_login(role, phone, PASSWORD).await?;
        ensure!(
            reply.status == StatusCode::OK,
            "login as {role} failed: {}",
            reply.status
        );
        let body = reply.json();
        Ok(Session {
            id: body["id"].as_str().context("login id")?.to_string(),
            token: body["token"].as_str().context("login token")?.to_string(),
        })
    }

    async fn notifications(&self, session: &Session) -> Result<Vec<Value>> {
        let reply = self
            .call(Method::GET, "/v1/notifications", Some(session), None)
            .await?;
        ensure!(reply.status == StatusCode::OK, "notifications: {}", reply.status);
        Ok(reply.json().as_array().cloned().unwrap_or_default())
    }

    /// Request a reset code for a student and read it back from the outbox.
    async fn mailed_otp(&self, phone: &str, email: &str) -> Result<(String, String)> {
        let issued = self
            .call(
                Method::POST,
                "/v1/password-reset/otp",
                None,
                Some(json!({ "role": "student", "phoneNumber": phone, "email": email })),
            )
            .await?;
        ensure!(issued.status == StatusCode::OK, "otp: {}", issued.status);
        let user_id = issued.json()["userId"]
            .as_str()
            .context("user id")?
            .to_string();
        let sent = self.mailer.sent().await;
        let otp = sent
            .last()
            .context("no mail sent")?
            .text
            .split(|c: char| !c.is_ascii_digit())
            .find(|digits| digits.len() == 6)
            .context("otp in mail")?
            .to_string();
        Ok((user_id, otp))
    }

    /// Find an account id in a directory listing by phone number.
    async fn directory_id(&self, listing: &str, caller: &Session, phone: &str) -> Result<String> {
        let reply = self
            .call(
                Method::GET,
                &format!("/v1/directory/{listing}"),
                Some(caller),
                None,
            )
            .await?;
        ensure!(reply.status == StatusCode::OK, "directory: {}", reply.status);
        reply
            .json()
            .as_array()
            .into_iter()
            .flatten()
            .find(|account| account["phoneNumber"] == phone)
            .and_then(|account| account["id"].as_str())
            .map(str::to_string)
            .context("account missing from directory")
    }
}

fn student(phone: &str, name: &str) -> Value {
    json!({
        "name": name,
        "phoneNumber": phone,
        "email": format!("{}@students.dev", name.to_lowercase()),
        "birthDate": "2011-04-02",
        "gender": "female",
        "password": PASSWORD,
        "grade": "8",
        "school": "DPS",
    })
}

fn student_of(phone: &str, name: &str, school: &str, grade: &str) -> Value {
    let mut body = student(phone, name);
    body["school"] = json!(school);
    body["grade"] = json!(grade);
    body
}

fn teacher(phone: &str) -> Value {
    json!({
        "name": "Meera",
        "phoneNumber": phone,
        "email": "meera@dps.dev",
        "birthDate": "1985-01-20",
        "password": PASSWORD,
        "institution": "DPS",
        "subjectExpertise": ["Maths"],
    })
}

fn local_admin(phone: &str) -> Value {
    json!({
        "name": "Kiran",
        "phoneNumber": phone,
        "email": "kiran@dps.dev",
        "birthDate": "1979-07-11",
        "password": PASSWORD,
        "institution": "DPS",
        "designation": "Principal",
    })
}

fn global_admin(phone: &str) -> Value {
    json!({
        "name": "Root",
        "phoneNumber": phone,
        "email": "root@eduresolve.dev",
        "birthDate": "1975-03-03",
        "password": PASSWORD,
    })
}

/// Global admin plus a verified local admin and teacher, all logged in.
struct Staff {
    local_admin: Session,
    teacher: Session,
}

async fn verified_staff(app: &TestApp) -> Result<Staff> {
    app.register("globalAdmin", global_admin("9000000001")).await?;
    let root = app.login("globalAdmin", "9000000001").await?;

    app.register("localAdmin", local_admin("9000000002")).await?;
    let admin_id = app
        .directory_id("local-admins", &root, "9000000002")
        .await?;
    let reply = app
        .call(
            Method::POST,
            &format!("/v1/verification/localAdmin/{admin_id}/verify"),
            Some(&root),
            None,
        )
        .await?;
    ensure!(reply.status == StatusCode::OK, "verify local admin: {}", reply.status);
    let local_admin = app.login("localAdmin", "9000000002").await?;

    app.register("teacher", teacher("9000000003")).await?;
    let teacher_id = app
        .directory_id("teachers", &local_admin, "9000000003")
        .await?;
    let reply = app
        .call(
            Method::POST,
            &format!("/v1/verification/teacher/{teacher_id}/verify"),
            Some(&local_admin),
            None,
        )
        .await?;
    ensure!(reply.status == StatusCode::OK, "verify teacher: {}", reply.status);
    let teacher = app.login("teacher", "9000000003").await?;

    Ok(Staff {
        local_admin,
        teacher,
    })
}

fn quiz() -> Value {
    json!({
        "title": "Warm-up",
        "deadline": "Friday",
        "grade": "8",
        "subject": "Maths",
        "questions": [{ "text": "2 + 2", "options": ["3", "4"], "answers": ["4"], "marks": 2 }],
    })
}

async fn upload_png(app: &TestApp, session: &Session) -> Result<String> {
    let stored = app
        .send(multipart_upload(session, "diagram.png", &png_bytes()?)?)
        .await?;
    ensure!(stored.status == StatusCode::CREATED, "upload: {}", stored.status);
    Ok(stored.json()["key"]
        .as_str()
        .context("media key")?
        .to_string())
}

fn png_bytes() -> Result<Vec<u8>> {
    let image = RgbImage::from_pixel(4, 4, Rgb([10, 200, 30]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn multipart_upload(session: &Session, filename: &str, bytes: &[u8]) -> Result<Request<Body>> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Ok(Request::builder()
        .method(Method::PUT)
        .uri("/v1/media")
        .header(header::AUTHORIZATION, format!("Bearer {}", session.token))
        .header("x-account-id", &session.id)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))?)
}

#[tokio::test]
async fn duplicate_phone_number_is_rejected() -> Result<()> {
    let app = TestApp::new()?;

    let first = app.register("student", student("9111111111", "Asha")).await?;
    assert_eq!(first.status, StatusCode::CREATED);
    assert_eq!(first.message(), "Registered");

    let second = app.register("student", student("9111111111", "Asha")).await?;
    assert_eq!(second.status, StatusCode::CONFLICT);
    assert_eq!(second.message(), "Phone number already exists");

    // The same phone may exist once per role.
    let teacher = app.register("teacher", teacher("9111111111")).await?;
    assert_eq!(teacher.status, StatusCode::CREATED);
    Ok(())
}

#[tokio::test]
async fn sessions_gate_requests_and_logout() -> Result<()> {
    let app = TestApp::new()?;
    app.register("student", student("9222222222", "Ravi")).await?;

    let wrong = app.try_login("student", "9222222222", "nope").await?;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    let unknown = app.try_login("student", "9333333333", PASSWORD).await?;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let session = app.login("student", "9222222222").await?;
    let ok = app
        .call(Method::GET, "/v1/notifications", Some(&session), None)
        .await?;
    assert_eq!(ok.status, StatusCode::OK);

    let anonymous = app.call(Method::GET, "/v1/notifications", None, None).await?;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let garbled = Session {
        id: session.id.clone(),
        token: "not-a-token".to_string(),
    };
    let reply = app
        .call(Method::GET, "/v1/notifications", Some(&garbled), None)
        .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.message(), "Invalid Token");

    let impostor = Session {
        id: uuid::Uuid::new_v4().to_string(),
        token: session.token.clone(),
    };
    let reply = app
        .call(Method::GET, "/v1/notifications", Some(&impostor), None)
        .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let logout_uri = format!("/v1/accounts/student/logout/{}", session.id);
    let reply = app
        .call(Method::POST, &logout_uri, Some(&session), None)
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.message(), "Logged out Successfully!");

    let reply = app
        .call(Method::GET, "/v1/notifications", Some(&session), None)
        .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = app
        .call(Method::POST, &logout_uri, Some(&session), None)
        .await?;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn second_login_invalidates_the_first() -> Result<()> {
    let app = TestApp::new()?;
    app.register("student", student("9444444444", "Noor")).await?;

    let first = app.login("student", "9444444444").await?;
    let second = app.login("student", "9444444444").await?;
    assert_ne!(first.token, second.token);

    let stale = app
        .call(Method::GET, "/v1/notifications", Some(&first), None)
        .await?;
    assert_eq!(stale.status, StatusCode::FORBIDDEN);

    let live = app
        .call(Method::GET, "/v1/notifications", Some(&second), None)
        .await?;
    assert_eq!(live.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn edit_details_only_touches_own_account() -> Result<()> {
    let app = TestApp::new()?;
    app.register("student", student("9555555555", "Zara")).await?;
    app.register("student", student("9555555556", "Omar")).await?;
    let zara = app.login("student", "9555555555").await?;
    let omar = app.login("student", "9555555556").await?;

    let uri = format!("/v1/accounts/student/edit-details/{}", zara.id);
    let reply = app
        .call(
            Method::PATCH,
            &uri,
            Some(&zara),
            Some(json!({ "grade": "9", "designation": "ignored" })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["profile"]["grade"], "9");

    let reply = app
        .call(Method::PATCH, &uri, Some(&omar), Some(json!({ "grade": "10" })))
        .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = app
        .call(
            Method::PATCH,
            &uri,
            Some(&zara),
            Some(json!({ "designation": "ignored" })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn local_admin_is_pending_until_verified() -> Result<()> {
    let app = TestApp::new()?;
    app.register("globalAdmin", global_admin("9666666661")).await?;
    let root = app.login("globalAdmin", "9666666661").await?;

    app.register("localAdmin", local_admin("9666666662")).await?;
    let pending = app.try_login("localAdmin", "9666666662", PASSWORD).await?;
    assert_eq!(pending.status, StatusCode::FORBIDDEN);
    assert_eq!(pending.message(), "Pending");

    let schools = app
        .call(Method::GET, "/v1/directory/schools", None, None)
        .await?;
    assert_eq!(schools.json(), json!([]));

    let admin_id = app
        .directory_id("local-admins", &root, "9666666662")
        .await?;
    let verify_uri = format!("/v1/verification/localAdmin/{admin_id}/verify");
    let reply = app.call(Method::POST, &verify_uri, Some(&root), None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.message(), "Verified");

    let again = app.call(Method::POST, &verify_uri, Some(&root), None).await?;
    assert_eq!(again.status, StatusCode::OK);

    let reject_uri = format!("/v1/verification/localAdmin/{admin_id}/reject");
    let contradict = app.call(Method::POST, &reject_uri, Some(&root), None).await?;
    assert_eq!(contradict.status, StatusCode::CONFLICT);

    let missing = app
        .call(
            Method::POST,
            &format!("/v1/verification/localAdmin/{}/verify", uuid::Uuid::new_v4()),
            Some(&root),
            None,
        )
        .await?;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.message(), "Local Admin Not Found");

    let admin = app.login("localAdmin", "9666666662").await?;
    let not_reviewer = app.call(Method::POST, &verify_uri, Some(&admin), None).await?;
    assert_eq!(not_reviewer.status, StatusCode::FORBIDDEN);

    let schools = app
        .call(Method::GET, "/v1/directory/schools", None, None)
        .await?;
    assert_eq!(schools.json(), json!(["DPS"]));
    Ok(())
}

#[tokio::test]
async fn rejected_teacher_cannot_log_in() -> Result<()> {
    let app = TestApp::new()?;
    let staff = verified_staff(&app).await?;

    app.register("teacher", teacher("9777777777")).await?;
    let teacher_id = app
        .directory_id("teachers", &staff.local_admin, "9777777777")
        .await?;
    let reply = app
        .call(
            Method::POST,
            &format!("/v1/verification/teacher/{teacher_id}/reject"),
            Some(&staff.local_admin),
            None,
        )
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.message(), "Rejected");

    let login = app.try_login("teacher", "9777777777", PASSWORD).await?;
    assert_eq!(login.status, StatusCode::FORBIDDEN);
    assert_eq!(login.message(), "Rejected");
    Ok(())
}

#[tokio::test]
async fn votes_toggle_and_replies_notify_the_author() -> Result<()> {
    let app = TestApp::new()?;
    let staff = verified_staff(&app).await?;
    app.register("student", student("9888888881", "Asha")).await?;
    let asha = app.login("student", "9888888881").await?;

    let thread_uri = format!("/v1/messages/{}@m1", asha.id);
    let reply = app
        .call(
            Method::PUT,
            &thread_uri,
            Some(&asha),
            Some(json!({ "body": "Why is the sky blue?", "tags": ["physics"] })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.message(), "Message Saved");

    let duplicate = app
        .call(
            Method::PUT,
            &thread_uri,
            Some(&asha),
            Some(json!({ "body": "again" })),
        )
        .await?;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let foreign = app
        .call(
            Method::PUT,
            &format!("/v1/messages/{}@m2", staff.teacher.id),
            Some(&asha),
            Some(json!({ "body": "not mine" })),
        )
        .await?;
    assert_eq!(foreign.status, StatusCode::FORBIDDEN);

    let upvote = format!("{thread_uri}/upvote");
    let downvote = format!("{thread_uri}/downvote");
    let len = |reply: &Reply| reply.json()["len"].as_u64();
    assert_eq!(len(&app.call(Method::POST, &upvote, Some(&asha), None).await?), Some(1));
    assert_eq!(len(&app.call(Method::POST, &upvote, Some(&asha), None).await?), Some(0));
    assert_eq!(len(&app.call(Method::POST, &upvote, Some(&asha), None).await?), Some(1));
    assert_eq!(len(&app.call(Method::POST, &downvote, Some(&asha), None).await?), Some(1));

    let thread = app
        .call(Method::GET, &thread_uri, Some(&asha), None)
        .await?
        .json();
    assert_eq!(thread["upvoters"], json!([]));
    assert_eq!(thread["downvoters"], json!([asha.id]));

    let reply = app
        .call(
            Method::PUT,
            &format!("{thread_uri}/replies"),
            Some(&staff.teacher),
            Some(json!({ "body": "Rayleigh scattering." })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::CREATED);

    let notifications = app.notifications(&asha).await?;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["category"], "Reply");
    assert_eq!(notifications[0]["actorName"], "Meera");

    let missing = app
        .call(
            Method::PUT,
            &format!("/v1/messages/{}@nope/replies", asha.id),
            Some(&staff.teacher),
            Some(json!({ "body": "hello" })),
        )
        .await?;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.message(), "Message Not Found");

    let notification_id = notifications[0]["id"].as_str().context("notification id")?;
    let clear_uri = format!("/v1/notifications/{notification_id}");
    let cleared = app.call(Method::DELETE, &clear_uri, Some(&asha), None).await?;
    assert_eq!(cleared.status, StatusCode::OK);
    let again = app.call(Method::DELETE, &clear_uri, Some(&asha), None).await?;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn reports_remove_thread_at_threshold() -> Result<()> {
    let app = TestApp::new()?;
    for (phone, name) in [
        ("9999999991", "Asha"),
        ("9999999992", "Ravi"),
        ("9999999993", "Noor"),
    ] {
        app.register("student", student(phone, name)).await?;
    }
    let author = app.login("student", "9999999991").await?;
    let ravi = app.login("student", "9999999992").await?;
    let noor = app.login("student", "9999999993").await?;

    let thread_uri = format!("/v1/messages/{}@m1", author.id);
    app.call(
        Method::PUT,
        &thread_uri,
        Some(&author),
        Some(json!({ "body": "spam" })),
    )
    .await?;

    let report_uri = format!("{thread_uri}/report");
    let first = app.call(Method::POST, &report_uri, Some(&ravi), None).await?;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.json()["alreadyReported"], false);

    let duplicate = app.call(Method::POST, &report_uri, Some(&ravi), None).await?;
    assert_eq!(duplicate.json()["alreadyReported"], true);

    let still_there = app.call(Method::GET, &thread_uri, Some(&ravi), None).await?;
    assert_eq!(still_there.status, StatusCode::OK);

    let crossing = app.call(Method::POST, &report_uri, Some(&noor), None).await?;
    assert_eq!(crossing.status, StatusCode::OK);

    let gone = app.call(Method::GET, &thread_uri, Some(&ravi), None).await?;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);

    let notifications = app.notifications(&author).await?;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["actorId"], "EDURESOLVE");
    assert!(
        notifications[0]["category"]
            .as_str()
            .is_some_and(|category| category.starts_with("Message Deleted"))
    );

    let after = app.call(Method::POST, &report_uri, Some(&ravi), None).await?;
    assert_eq!(after.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn default_threshold_takes_ten_reports() -> Result<()> {
    let app = TestApp::with_config(AppConfig::new(FRONTEND.to_string()))?;
    app.register("student", student("9300000000", "Asha")).await?;
    let author = app.login("student", "9300000000").await?;

    let mut reporters = Vec::new();
    for n in 1..=10 {
        let phone = format!("93000000{n:02}");
        app.register("student", student(&phone, &format!("Reporter{n}")))
            .await?;
        reporters.push(app.login("student", &phone).await?);
    }

    let thread_uri = format!("/v1/messages/{}@m1", author.id);
    let posted = app
        .call(
            Method::PUT,
            &thread_uri,
            Some(&author),
            Some(json!({ "body": "borderline" })),
        )
        .await?;
    assert_eq!(posted.status, StatusCode::CREATED);

    let report_uri = format!("{thread_uri}/report");
    let (last, first_nine) = reporters.split_last().context("reporters")?;
    for reporter in first_nine {
        let reply = app
            .call(Method::POST, &report_uri, Some(reporter), None)
            .await?;
        assert_eq!(reply.status, StatusCode::OK);
    }
    let kept = app.call(Method::GET, &thread_uri, Some(last), None).await?;
    assert_eq!(kept.status, StatusCode::OK);
    assert!(app.notifications(&author).await?.is_empty());

    let tenth = app.call(Method::POST, &report_uri, Some(last), None).await?;
    assert_eq!(tenth.status, StatusCode::OK);
    let gone = app.call(Method::GET, &thread_uri, Some(last), None).await?;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
    assert_eq!(app.notifications(&author).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn removed_thread_takes_its_image_along() -> Result<()> {
    let app = TestApp::new()?;
    for (phone, name) in [
        ("9310000001", "Asha"),
        ("9310000002", "Ravi"),
        ("9310000003", "Noor"),
    ] {
        app.register("student", student(phone, name)).await?;
    }
    let asha = app.login("student", "9310000001").await?;
    let ravi = app.login("student", "9310000002").await?;
    let noor = app.login("student", "9310000003").await?;

    let key = upload_png(&app, &asha).await?;
    let media_uri = format!("/v1/media/{key}");
    let thread_uri = format!("/v1/messages/{}@img", asha.id);
    let posted = app
        .call(
            Method::PUT,
            &thread_uri,
            Some(&asha),
            Some(json!({ "body": "See the diagram", "imageKey": key })),
        )
        .await?;
    assert_eq!(posted.status, StatusCode::CREATED);

    let report_uri = format!("{thread_uri}/report");
    app.call(Method::POST, &report_uri, Some(&ravi), None).await?;
    let served = app.call(Method::GET, &media_uri, None, None).await?;
    assert_eq!(served.status, StatusCode::OK);

    app.call(Method::POST, &report_uri, Some(&noor), None).await?;
    let thread = app.call(Method::GET, &thread_uri, Some(&ravi), None).await?;
    assert_eq!(thread.status, StatusCode::NOT_FOUND);
    let purged = app.call(Method::GET, &media_uri, None, None).await?;
    assert_eq!(purged.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn images_attach_only_to_their_uploaders_posts() -> Result<()> {
    let app = TestApp::new()?;
    for (phone, name) in [
        ("9320000001", "Asha"),
        ("9320000002", "Mallory"),
        ("9320000003", "Noor"),
    ] {
        app.register("student", student(phone, name)).await?;
    }
    let asha = app.login("student", "9320000001").await?;
    let mallory = app.login("student", "9320000002").await?;
    let noor = app.login("student", "9320000003").await?;

    let key = upload_png(&app, &asha).await?;
    let media_uri = format!("/v1/media/{key}");

    let hijack_uri = format!("/v1/messages/{}@m1", mallory.id);
    let hijack = app
        .call(
            Method::PUT,
            &hijack_uri,
            Some(&mallory),
            Some(json!({ "body": "spam", "imageKey": key })),
        )
        .await?;
    assert_eq!(hijack.status, StatusCode::FORBIDDEN);

    let asha_thread = format!("/v1/messages/{}@m1", asha.id);
    app.call(
        Method::PUT,
        &asha_thread,
        Some(&asha),
        Some(json!({ "body": "Question" })),
    )
    .await?;
    let hijack_reply = app
        .call(
            Method::PUT,
            &format!("{asha_thread}/replies"),
            Some(&mallory),
            Some(json!({ "body": "look", "imageKey": key })),
        )
        .await?;
    assert_eq!(hijack_reply.status, StatusCode::FORBIDDEN);

    // Mallory's own thread still gets moderated without touching Asha's upload.
    app.call(
        Method::PUT,
        &hijack_uri,
        Some(&mallory),
        Some(json!({ "body": "spam" })),
    )
    .await?;
    let report_uri = format!("{hijack_uri}/report");
    app.call(Method::POST, &report_uri, Some(&asha), None).await?;
    app.call(Method::POST, &report_uri, Some(&noor), None).await?;
    let gone = app.call(Method::GET, &hijack_uri, Some(&asha), None).await?;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);

    let served = app.call(Method::GET, &media_uri, None, None).await?;
    assert_eq!(served.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn assignments_are_graded_once_and_notify_both_sides() -> Result<()> {
    let app = TestApp::new()?;
    let staff = verified_staff(&app).await?;
    app.register("student", student("9123456781", "Asha")).await?;
    app.register("student", student("9123456782", "Ravi")).await?;
    let asha = app.login("student", "9123456781").await?;
    let ravi = app.login("student", "9123456782").await?;

    let assignment_uri = format!("/v1/assignments/{}@a1", staff.teacher.id);
    let reply = app
        .call(
            Method::PUT,
            &assignment_uri,
            Some(&staff.teacher),
            Some(json!({
                "title": "Warm-up",
                "deadline": "Friday",
                "grade": "8",
                "subject": "Maths",
                "questions": [
                    { "text": "2 + 2", "options": ["3", "4"], "answers": ["4"], "marks": 2 },
                    { "text": "Vowels", "options": ["a", "b", "e"], "answers": ["a", "e"], "marks": 3 },
                    { "text": "Capital of France", "answers": ["Paris"], "marks": 5 },
                ],
            })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::CREATED);

    let notifications = app.notifications(&asha).await?;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["category"], "Assignment");

    let student_view = app
        .call(Method::GET, &assignment_uri, Some(&asha), None)
        .await?
        .json();
    assert_eq!(student_view["questions"][0].get("answers"), None);
    assert_eq!(student_view["submitted"], false);

    let submission_uri = format!("{assignment_uri}/submission");
    let graded = app
        .call(
            Method::PUT,
            &submission_uri,
            Some(&asha),
            Some(json!({ "answers": [["4"], [" E", "a"], null] })),
        )
        .await?;
    assert_eq!(graded.status, StatusCode::CREATED);
    assert_eq!(graded.json()["marks"], "5/5");

    let again = app
        .call(
            Method::PUT,
            &submission_uri,
            Some(&asha),
            Some(json!({ "answers": [["4"], ["a", "e"], ["Paris"]] })),
        )
        .await?;
    assert_eq!(again.status, StatusCode::CONFLICT);
    assert_eq!(again.message(), "Already Submitted");

    let too_many = app
        .call(
            Method::PUT,
            &submission_uri,
            Some(&ravi),
            Some(json!({ "answers": [null, null, null, null] })),
        )
        .await?;
    assert_eq!(too_many.status, StatusCode::BAD_REQUEST);

    let own = app
        .call(Method::GET, &submission_uri, Some(&asha), None)
        .await?
        .json();
    assert_eq!(own["marks"], "5/5");

    let teacher_notifications = app.notifications(&staff.teacher).await?;
    assert_eq!(teacher_notifications.len(), 1);
    assert_eq!(teacher_notifications[0]["category"], "Assignment Submit");
    assert_eq!(teacher_notifications[0]["actorName"], "Asha");

    let report = app
        .call(
            Method::GET,
            &format!("{assignment_uri}/submissions"),
            Some(&staff.teacher),
            None,
        )
        .await?
        .json();
    assert_eq!(
        report["submitted"],
        json!([{ "id": asha.id, "name": "Asha", "marks": "5/5" }])
    );
    assert_eq!(report["unsubmitted"], json!([{ "id": ravi.id, "name": "Ravi" }]));

    let forbidden = app
        .call(
            Method::GET,
            &format!("{assignment_uri}/submissions"),
            Some(&asha),
            None,
        )
        .await?;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);

    let listed = app
        .call(
            Method::GET,
            "/v1/assignments?school=DPS&grade=8",
            Some(&ravi),
            None,
        )
        .await?
        .json();
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let deleted = app
        .call(Method::DELETE, &assignment_uri, Some(&staff.teacher), None)
        .await?;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.message(), "Deleted Successfully");
    let gone = app
        .call(Method::DELETE, &assignment_uri, Some(&staff.teacher), None)
        .await?;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn only_the_target_class_can_submit() -> Result<()> {
    let app = TestApp::new()?;
    let staff = verified_staff(&app).await?;
    app.register("student", student("9330000001", "Asha")).await?;
    app.register("student", student_of("9330000002", "Kabir", "KV", "8"))
        .await?;
    app.register("student", student_of("9330000003", "Leela", "DPS", "9"))
        .await?;
    let asha = app.login("student", "9330000001").await?;
    let kabir = app.login("student", "9330000002").await?;
    let leela = app.login("student", "9330000003").await?;

    let assignment_uri = format!("/v1/assignments/{}@a1", staff.teacher.id);
    let posted = app
        .call(Method::PUT, &assignment_uri, Some(&staff.teacher), Some(quiz()))
        .await?;
    assert_eq!(posted.status, StatusCode::CREATED);

    let submission_uri = format!("{assignment_uri}/submission");
    let answers = json!({ "answers": [["4"]] });
    for outsider in [&kabir, &leela] {
        let reply = app
            .call(
                Method::PUT,
                &submission_uri,
                Some(outsider),
                Some(answers.clone()),
            )
            .await?;
        assert_eq!(reply.status, StatusCode::FORBIDDEN);
    }
    assert!(app.notifications(&staff.teacher).await?.is_empty());

    let graded = app
        .call(Method::PUT, &submission_uri, Some(&asha), Some(answers))
        .await?;
    assert_eq!(graded.status, StatusCode::CREATED);

    let report = app
        .call(
            Method::GET,
            &format!("{assignment_uri}/submissions"),
            Some(&staff.teacher),
            None,
        )
        .await?
        .json();
    assert_eq!(
        report["submitted"],
        json!([{ "id": asha.id, "name": "Asha", "marks": "2/2" }])
    );
    assert_eq!(report["unsubmitted"], json!([]));
    Ok(())
}

#[tokio::test]
async fn reposted_assignment_accepts_fresh_submissions() -> Result<()> {
    let app = TestApp::new()?;
    let staff = verified_staff(&app).await?;
    app.register("student", student("9340000001", "Asha")).await?;
    let asha = app.login("student", "9340000001").await?;

    let assignment_uri = format!("/v1/assignments/{}@a1", staff.teacher.id);
    let submission_uri = format!("{assignment_uri}/submission");
    let answers = json!({ "answers": [["4"]] });

    for _ in 0..2 {
        let posted = app
            .call(Method::PUT, &assignment_uri, Some(&staff.teacher), Some(quiz()))
            .await?;
        assert_eq!(posted.status, StatusCode::CREATED);

        let graded = app
            .call(
                Method::PUT,
                &submission_uri,
                Some(&asha),
                Some(answers.clone()),
            )
            .await?;
        assert_eq!(graded.status, StatusCode::CREATED);

        let deleted = app
            .call(Method::DELETE, &assignment_uri, Some(&staff.teacher), None)
            .await?;
        assert_eq!(deleted.status, StatusCode::OK);
    }
    Ok(())
}

#[tokio::test]
async fn password_reset_by_mailed_code() -> Result<()> {
    let app = TestApp::new()?;
    app.register("student", student("9012345678", "Asha")).await?;

    let unknown = app
        .call(
            Method::POST,
            "/v1/password-reset/otp",
            None,
            Some(json!({ "role": "student", "phoneNumber": "9012345678", "email": "other@x.dev" })),
        )
        .await?;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let issued = app
        .call(
            Method::POST,
            "/v1/password-reset/otp",
            None,
            Some(json!({ "role": "student", "phoneNumber": "9012345678", "email": "ASHA@students.dev" })),
        )
        .await?;
    assert_eq!(issued.status, StatusCode::OK);
    assert_eq!(issued.message(), "OTP sent");
    let user_id = issued.json()["userId"]
        .as_str()
        .context("user id")?
        .to_string();

    let sent = app.mailer.sent().await;
    assert_eq!(sent.len(), 1);
    let otp = sent[0]
        .text
        .split(|c: char| !c.is_ascii_digit())
        .find(|digits| digits.len() == 6)
        .context("otp in mail")?
        .to_string();
    let wrong = if otp == "000000" { "111111" } else { "000000" };

    let rejected = app
        .call(
            Method::POST,
            "/v1/password-reset/verify",
            None,
            Some(json!({ "userId": user_id, "role": "student", "otp": wrong, "password": "new pass" })),
        )
        .await?;
    assert_eq!(rejected.status, StatusCode::UNAUTHORIZED);
    assert_eq!(rejected.message(), "Invalid OTP");

    let wrong_role = app
        .call(
            Method::POST,
            "/v1/password-reset/verify",
            None,
            Some(json!({ "userId": user_id, "role": "teacher", "otp": otp, "password": "new pass" })),
        )
        .await?;
    assert_eq!(wrong_role.status, StatusCode::UNAUTHORIZED);

    let reset = app
        .call(
            Method::POST,
            "/v1/password-reset/verify",
            None,
            Some(json!({ "userId": user_id, "role": "student", "otp": otp, "password": "new pass" })),
        )
        .await?;
    assert_eq!(reset.status, StatusCode::OK);
    assert_eq!(reset.message(), "verified And Reset");

    let replay = app
        .call(
            Method::POST,
            "/v1/password-reset/verify",
            None,
            Some(json!({ "userId": user_id, "role": "student", "otp": otp, "password": "again" })),
        )
        .await?;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);

    let old = app.try_login("student", "9012345678", PASSWORD).await?;
    assert_eq!(old.status, StatusCode::UNAUTHORIZED);
    let new = app.try_login("student", "9012345678", "new pass").await?;
    assert_eq!(new.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn racing_resets_consume_the_code_once() -> Result<()> {
    let app = TestApp::new()?;
    app.register("student", student("9350000001", "Asha")).await?;
    let (user_id, otp) = app.mailed_otp("9350000001", "asha@students.dev").await?;

    let verify = |password: &str| {
        app.call(
            Method::POST,
            "/v1/password-reset/verify",
            None,
            Some(json!({ "userId": user_id, "role": "student", "otp": otp, "password": password })),
        )
    };
    let (first, second) = tokio::join!(verify("first pass"), verify("second pass"));
    let mut statuses = [first?.status, second?.status];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::UNAUTHORIZED]);
    Ok(())
}

#[tokio::test]
async fn repeated_wrong_codes_discard_the_ticket() -> Result<()> {
    let app = TestApp::new()?;
    app.register("student", student("9360000001", "Asha")).await?;
    let (user_id, otp) = app.mailed_otp("9360000001", "asha@students.dev").await?;
    let wrong = if otp == "000000" { "111111" } else { "000000" };

    let verify = |code: &str| {
        app.call(
            Method::POST,
            "/v1/password-reset/verify",
            None,
            Some(json!({ "userId": user_id, "role": "student", "otp": code, "password": "new pass" })),
        )
    };
    for _ in 0..5 {
        assert_eq!(verify(wrong).await?.status, StatusCode::UNAUTHORIZED);
    }
    assert_eq!(verify(&otp).await?.status, StatusCode::UNAUTHORIZED);

    // A fresh code starts a fresh count.
    let (_, fresh) = app.mailed_otp("9360000001", "asha@students.dev").await?;
    let wrong = if fresh == "000000" { "111111" } else { "000000" };
    assert_eq!(verify(wrong).await?.status, StatusCode::UNAUTHORIZED);
    assert_eq!(verify(&fresh).await?.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn media_upload_round_trip() -> Result<()> {
    let app = TestApp::new()?;
    app.register("student", student("9876543210", "Asha")).await?;
    let asha = app.login("student", "9876543210").await?;

    let png = png_bytes()?;
    let stored = app.send(multipart_upload(&asha, "diagram.png", &png)?).await?;
    assert_eq!(stored.status, StatusCode::CREATED);
    let key = stored.json()["key"]
        .as_str()
        .context("media key")?
        .to_string();

    let fetched = app
        .call(Method::GET, &format!("/v1/media/{key}"), None, None)
        .await?;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.content_type.as_deref(), Some("image/png"));
    assert_eq!(fetched.bytes, png);

    let unknown = app
        .call(Method::GET, "/v1/media/bm90LWEta2V5", None, None)
        .await?;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let text = app.send(multipart_upload(&asha, "notes.txt", b"hello")?).await?;
    assert_eq!(text.status, StatusCode::BAD_REQUEST);

    let huge = vec![0_u8; 4 * 1024 * 1024 + 1];
    let too_large = app.send(multipart_upload(&asha, "huge.png", &huge)?).await?;
    assert_eq!(too_large.status, StatusCode::PAYLOAD_TOO_LARGE);

    // Threads may reference an uploaded image.
    let reply = app
        .call(
            Method::PUT,
            &format!("/v1/messages/{}@img", asha.id),
            Some(&asha),
            Some(json!({ "body": "See the diagram", "imageKey": key })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    Ok(())
}

#[tokio::test]
async fn health_reports_store_status() -> Result<()> {
    let app = TestApp::new()?;
    let reply = app.call(Method::GET, "/health", None, None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["store"], "ok");
    assert_eq!(reply.json()["name"], env!("CARGO_PKG_NAME"));
    Ok(())
}
