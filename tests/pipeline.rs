//! End-to-end pipeline tests against a mock solver API.

use std::time::Duration;

use chrono::Utc;
use dwave_cloud::{Client, Error, RemoteStatus};
use serde_json::{json, Value};
use tokio::time::Instant;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const BACKOFF_MIN: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_millis(100);

fn client(server: &MockServer) -> Client {
    let _ = tracing_subscriber::fmt().try_init();
    Client::builder()
        .endpoint(server.uri())
        .token("secret")
        .poll_backoff(BACKOFF_MIN, BACKOFF_MAX)
        .build()
        .expect("client")
}

fn answer_data() -> Value {
    json!({
        "format": "qp",
        "num_variables": 5,
        "energies": "AAAAAAAALsA=",
        "num_occurrences": "ZAAAAA==",
        "active_variables": "AAAAAAEAAAACAAAAAwAAAAQAAAA=",
        "solutions": "AAAAAA==",
        "timing": {},
    })
}

fn continue_reply(id: &str) -> Value {
    json!({
        "status": "PENDING",
        "solved_on": null,
        "solver": "abc123",
        "submitted_on": Utc::now().to_rfc3339(),
        "type": "ising",
        "id": id,
    })
}

fn complete_reply(id: &str) -> Value {
    json!({
        "status": "COMPLETED",
        "solved_on": "2013-01-18T10:26:00.020954",
        "solver": "abc123",
        "submitted_on": "2013-01-18T10:25:59.941674",
        "answer": answer_data(),
        "type": "ising",
        "id": id,
    })
}

fn complete_no_answer_reply(id: &str) -> Value {
    json!({
        "status": "COMPLETED",
        "solved_on": "2012-12-05T19:15:07+00:00",
        "solver": "abc123",
        "submitted_on": "2012-12-05T19:06:57+00:00",
        "type": "ising",
        "id": id,
    })
}

fn error_reply(id: &str, error: &str) -> Value {
    json!({
        "status": "FAILED",
        "solver": "abc123",
        "type": "ising",
        "id": id,
        "error_message": error,
    })
}

fn cancel_reply(id: &str) -> Value {
    json!({
        "status": "CANCELLED",
        "solver": "abc123",
        "type": "ising",
        "id": id,
    })
}

fn ok_json(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

/// Accepts a submitted batch of any size and returns one aligned PENDING
/// record per problem, with the id taken from the problem's `problem`
/// field.
struct AcceptSubmission;

impl Respond for AcceptSubmission {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let problems: Vec<Value> = serde_json::from_slice(&request.body).expect("problem array");
        let records: Vec<Value> = problems
            .iter()
            .map(|problem| continue_reply(&problem["problem"].to_string()))
            .collect();
        ok_json(Value::Array(records))
    }
}

/// Answers a grouped status query with one record per queried id.
struct StatusByIds(fn(&str) -> Value);

impl Respond for StatusByIds {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let ids = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        let records: Vec<Value> = ids.split(',').map(|id| (self.0)(id)).collect();
        ok_json(Value::Array(records))
    }
}

#[tokio::test]
async fn submit_then_poll_with_inline_answer() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(
            ok_json(json!([continue_reply("123")]))
                .insert_header("Date", Utc::now().to_rfc2822().as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "123"))
        .respond_with(ok_json(json!([complete_reply("123")])))
        .mount(&server)
        .await;

    let client = client(&server);
    let computation = client.submit(r#"{"problem": 1}"#);

    let answer = computation.wait_result(None).await.expect("answer");
    assert_eq!(answer, answer_data());
    assert_eq!(computation.remote_id().as_deref(), Some("123"));
    assert_eq!(computation.remote_status(), Some(RemoteStatus::Completed));
    assert!(computation.clock_offset().is_some());
    assert!(computation.time_received().is_some());
    assert!(computation.time_solved().is_some());

    client.close().await;
}

#[tokio::test]
async fn completed_without_answer_downloads_result() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(ok_json(json!([complete_no_answer_reply("123")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/123/"))
        .respond_with(ok_json(complete_reply("123")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let computation = client.submit(r#"{"problem": 1}"#);

    let answer = computation.wait_result(None).await.expect("answer");
    assert_eq!(answer, answer_data());

    client.close().await;
    server.verify().await;
}

#[tokio::test]
async fn poll_backoff_doubles_until_completion() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(ok_json(json!([continue_reply("123")])))
        .mount(&server)
        .await;
    // Two pending polls, then completion without an inline answer.
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "123"))
        .respond_with(ok_json(json!([continue_reply("123")])))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "123"))
        .respond_with(ok_json(json!([complete_no_answer_reply("123")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/123/"))
        .respond_with(ok_json(complete_reply("123")))
        .mount(&server)
        .await;

    let client = client(&server);
    let computation = client.submit(r#"{"problem": 1}"#);

    computation.wait_result(None).await.expect("answer");
    // Scheduled three times: min, min*2, min*4.
    assert_eq!(computation.poll_backoff(), Some(BACKOFF_MIN * 4));

    client.close().await;
}

#[tokio::test]
async fn server_errors_during_polling_are_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(ok_json(json!([continue_reply("123")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "123"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "123"))
        .respond_with(ResponseTemplate::new(504))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "123"))
        .respond_with(ok_json(json!([continue_reply("123")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "123"))
        .respond_with(ok_json(json!([complete_reply("123")])))
        .mount(&server)
        .await;

    let client = client(&server);
    let computation = client.submit(r#"{"problem": 1}"#);

    let answer = computation.wait_result(None).await.expect("answer");
    assert_eq!(answer, answer_data());
    // Back-off kept growing through the transient failures.
    assert_eq!(computation.poll_backoff(), Some(BACKOFF_MIN * 8));

    client.close().await;
}

#[tokio::test]
async fn immediate_rejection_settles_with_solver_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(ok_json(json!([{
            "error_code": 400,
            "error_msg": "Missing parameter 'num_reads'",
        }])))
        .mount(&server)
        .await;

    let client = client(&server);
    let computation = client.submit(r#"{"problem": 1}"#);

    let result = computation.wait_result(None).await;
    assert_eq!(
        result,
        Err(Error::SolverFailure(
            "Missing parameter 'num_reads'".to_string()
        ))
    );

    client.close().await;
}

#[tokio::test]
async fn failed_and_cancelled_statuses_settle_with_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(ok_json(json!([error_reply("1", "An error message")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(ok_json(json!([error_reply("2", "solver is offline")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(ok_json(json!([cancel_reply("3")])))
        .mount(&server)
        .await;

    let client = client(&server);

    let failed = client.submit(r#"{"problem": 1}"#);
    assert_eq!(
        failed.wait_result(None).await,
        Err(Error::SolverFailure("An error message".to_string()))
    );

    let offline = client.submit(r#"{"problem": 2}"#);
    assert_eq!(
        offline.wait_result(None).await,
        Err(Error::SolverOffline("solver is offline".to_string()))
    );

    let cancelled = client.submit(r#"{"problem": 3}"#);
    assert_eq!(cancelled.wait_result(None).await, Err(Error::Cancelled));

    client.close().await;
}

#[tokio::test]
async fn unparsable_submit_response_settles_with_io_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;

    let client = client(&server);
    let computation = client.submit(r#"{"problem": 1}"#);

    assert!(matches!(
        computation.wait_result(None).await,
        Err(Error::Io(_))
    ));

    client.close().await;
}

#[tokio::test]
async fn auth_failure_on_submit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client(&server);
    let computation = client.submit(r#"{"problem": 1}"#);

    assert_eq!(computation.wait_result(None).await, Err(Error::Auth));

    client.close().await;
}

#[tokio::test]
async fn cancel_before_remote_id_is_delivered_exactly_once() {
    let server = MockServer::start().await;

    // Submission is slow enough for the cancel to arrive first.
    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(
            ok_json(json!([continue_reply("test-id")])).set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/problems/"))
        .and(body_json(json!(["test-id"])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "test-id"))
        .respond_with(ok_json(json!([cancel_reply("test-id")])))
        .mount(&server)
        .await;

    let client = client(&server);
    let computation = client.submit(r#"{"problem": 1}"#);
    computation.cancel();
    computation.cancel();

    assert_eq!(computation.wait_result(None).await, Err(Error::Cancelled));

    client.close().await;
    server.verify().await;
}

#[tokio::test]
async fn cancel_with_known_remote_id_is_delivered_exactly_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "test-id"))
        .respond_with(ok_json(json!([continue_reply("test-id")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/problems/"))
        .and(body_json(json!(["test-id"])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "test-id"))
        .respond_with(ok_json(json!([cancel_reply("test-id")])))
        .mount(&server)
        .await;

    let client = client(&server);
    let computation = client.retrieve_problem("test-id").expect("poll scheduled");

    // Wait for the first poll to report PENDING, then cancel.
    let deadline = Instant::now() + Duration::from_secs(5);
    while computation.remote_status() != Some(RemoteStatus::Pending) {
        assert!(Instant::now() < deadline, "first poll never arrived");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    computation.cancel();

    assert_eq!(computation.wait_result(None).await, Err(Error::Cancelled));

    client.close().await;
    server.verify().await;
}

#[tokio::test]
async fn polling_timeout_settles_the_computation() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(ok_json(json!([continue_reply("123")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "123"))
        .respond_with(ok_json(json!([continue_reply("123")])))
        .mount(&server)
        .await;

    let client = Client::builder()
        .endpoint(server.uri())
        .token("secret")
        .poll_backoff(Duration::from_millis(25), Duration::from_millis(25))
        .polling_timeout(Duration::from_millis(60))
        .build()
        .expect("client");

    let computation = client.submit(r#"{"problem": 1}"#);
    assert_eq!(
        computation.wait_result(None).await,
        Err(Error::PollingTimeout)
    );

    client.close().await;
}

#[tokio::test]
async fn wait_result_timeout_leaves_the_computation_running() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(ok_json(json!([continue_reply("123")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "123"))
        .respond_with(ok_json(json!([continue_reply("123")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .and(query_param("id", "123"))
        .respond_with(ok_json(json!([complete_reply("123")])))
        .mount(&server)
        .await;

    let client = client(&server);
    let computation = client.submit(r#"{"problem": 1}"#);

    assert_eq!(
        computation.wait_result(Some(Duration::from_millis(1))).await,
        Err(Error::WaitTimeout)
    );

    let answer = computation.wait_result(None).await.expect("answer");
    assert_eq!(answer, answer_data());

    client.close().await;
}

#[tokio::test]
async fn concurrent_submissions_all_settle() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/problems/"))
        .respond_with(AcceptSubmission)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems/"))
        .respond_with(StatusByIds(complete_reply))
        .mount(&server)
        .await;

    let client = client(&server);
    let computations: Vec<_> = (0..10)
        .map(|n| client.submit(format!(r#"{{"problem": {n}}}"#)))
        .collect();

    for computation in &computations {
        let answer = computation.wait_result(None).await.expect("answer");
        assert_eq!(answer, answer_data());
        assert!(computation.remote_id().is_some());
    }

    client.close().await;
}
