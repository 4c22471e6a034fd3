//! Task-aware client with CRUD helpers.
//!
//! Actions that start server-side tasks answer with a task record; the
//! record is polled until the task pauses or stops.

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::api::{Api, ApiConfig, CallOptions};
use crate::error::{ApiError, TaskApiError};
use crate::resource::Resource;
use crate::route::param_to_string;
use crate::transport::Transport;

/// Page size that effectively disables pagination on `index` calls.
pub const PER_PAGE: u64 = 2 << 31;

pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TASK_POLL: Duration = Duration::from_secs(4);
pub const DEFAULT_TASKS_RESOURCE: &str = "foreman_tasks";
/// Shortest poll interval accepted by [`TaskAwareApi::task_poll`].
pub const MIN_TASK_POLL: Duration = Duration::from_millis(1);

const TERMINAL_STATES: [&str; 2] = ["paused", "stopped"];

/// A server-side asynchronous task as reported by the API.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: Value,
    pub action: String,
    pub state: String,
    pub result: Option<String>,
    pub humanized_errors: Value,
    /// The record as returned by the server.
    pub raw: Value,
}

impl Task {
    pub fn id_string(&self) -> String {
        param_to_string(&self.id)
    }

    /// Paused or stopped.
    pub fn is_terminal(&self) -> bool {
        TERMINAL_STATES.contains(&self.state.as_str())
    }

    pub fn succeeded(&self) -> bool {
        self.result.as_deref() == Some("success")
    }
}

/// Recognize a task record: an object with `action`, `state` and `started_at`.
pub fn try_as_task(value: &Value) -> Option<Task> {
    let record = value.as_object()?;
    if !["action", "state", "started_at"]
        .iter()
        .all(|key| record.contains_key(*key))
    {
        return None;
    }
    let text = |key: &str| record.get(key).map(param_to_string).unwrap_or_default();
    Some(Task {
        id: record.get("id").cloned().unwrap_or(Value::Null),
        action: text("action"),
        state: text("state"),
        result: record.get("result").and_then(Value::as_str).map(str::to_string),
        humanized_errors: record
            .get("humanized")
            .and_then(|h| h.get("errors"))
            .cloned()
            .unwrap_or(Value::Null),
        raw: value.clone(),
    })
}

/// [`Api`] pinned to version 2, waiting for tasks started by its calls.
#[derive(Debug)]
pub struct TaskAwareApi {
    api: Api,
    task_timeout: Duration,
    task_poll: Duration,
    tasks_resource: String,
}

impl TaskAwareApi {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        Ok(Self::from_api(Api::new(config.api_version(2))?))
    }

    pub fn with_transport(config: ApiConfig, transport: Box<dyn Transport>) -> Result<Self, ApiError> {
        Ok(Self::from_api(Api::with_transport(
            config.api_version(2),
            transport,
        )?))
    }

    fn from_api(api: Api) -> Self {
        Self {
            api,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            task_poll: DEFAULT_TASK_POLL,
            tasks_resource: DEFAULT_TASKS_RESOURCE.to_string(),
        }
    }

    /// Total time to wait for a task before giving up.
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Interval between two polls of a running task, at least [`MIN_TASK_POLL`].
    pub fn task_poll(mut self, poll: Duration) -> Self {
        self.task_poll = poll.max(MIN_TASK_POLL);
        self
    }

    /// Resource whose `show` action reports task state.
    pub fn tasks_resource(mut self, name: impl Into<String>) -> Self {
        self.tasks_resource = name.into();
        self
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn resource(&self, name: &str) -> Result<Resource<'_>, TaskApiError> {
        if !self.api.has_resource(name)? {
            return Err(TaskApiError::UnknownResource {
                resource: name.to_string(),
            });
        }
        Ok(self.api.resource(name)?)
    }

    fn prepare_params(
        &self,
        resource: &str,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<Map<String, Value>, TaskApiError> {
        Ok(self.resource(resource)?.action(action)?.prepare_params(params)?)
    }

    /// Run `action` on `resource` with `params` reshaped to the action's schema.
    ///
    /// A task returned by the call is waited for and the final task record is
    /// returned instead. Every failure is reported as [`TaskApiError::Action`].
    #[instrument(level = "debug", skip(self, params, options))]
    pub fn resource_action(
        &self,
        resource: &str,
        action: &str,
        params: &Map<String, Value>,
        options: &CallOptions,
        ignore_task_errors: bool,
    ) -> Result<Option<Value>, TaskApiError> {
        self.perform(resource, action, params, options, ignore_task_errors)
            .map_err(|err| match err {
                TaskApiError::Api(err) => TaskApiError::wrap(resource, action, err),
                err => TaskApiError::wrap(resource, action, err),
            })
    }

    fn perform(
        &self,
        resource: &str,
        action: &str,
        params: &Map<String, Value>,
        options: &CallOptions,
        ignore_task_errors: bool,
    ) -> Result<Option<Value>, TaskApiError> {
        let payload = self.prepare_params(resource, action, params)?;
        let result = self.resource(resource)?.call(action, &payload, options)?;
        match result.as_ref().and_then(try_as_task) {
            Some(task) => Ok(Some(self.wait_for_task(task, ignore_task_errors)?.raw)),
            None => Ok(result),
        }
    }

    /// Poll `task` until it is paused or stopped.
    ///
    /// Fails with [`TaskApiError::Timeout`] once the task timeout is used up,
    /// and with [`TaskApiError::TaskFailed`] when the finished task did not
    /// succeed, unless `ignore_errors` is set.
    pub fn wait_for_task(&self, mut task: Task, ignore_errors: bool) -> Result<Task, TaskApiError> {
        let mut remaining = self.task_timeout;
        while !task.is_terminal() {
            remaining = remaining.saturating_sub(self.task_poll);
            if remaining.is_zero() {
                return Err(TaskApiError::Timeout {
                    id: task.id_string(),
                });
            }
            thread::sleep(self.task_poll);

            let mut params = Map::new();
            params.insert("id".to_string(), task.id.clone());
            let payload = self.prepare_params(&self.tasks_resource, "show", &params)?;
            let record = self
                .resource(&self.tasks_resource)?
                .call("show", &payload, &CallOptions::default())?;
            task = record.as_ref().and_then(try_as_task).ok_or_else(|| {
                TaskApiError::Server(format!(
                    "unexpected response while polling Task {}",
                    task.id_string()
                ))
            })?;
            debug!(id = %task.id_string(), state = %task.state, "polled task");
        }

        if !ignore_errors && !task.succeeded() {
            return Err(TaskApiError::TaskFailed {
                action: task.action.clone(),
                id: task.id_string(),
                errors: param_to_string(&task.humanized_errors),
            });
        }
        Ok(task)
    }

    /// `show` the entity `id`; `params` adds lookup params such as parent ids.
    pub fn show(
        &self,
        resource: &str,
        id: impl Into<Value>,
        params: Option<&Map<String, Value>>,
    ) -> Result<Option<Value>, TaskApiError> {
        let mut payload = Map::new();
        payload.insert("id".to_string(), id.into());
        extend(&mut payload, params);
        self.resource_action(resource, "show", &payload, &CallOptions::default(), false)
    }

    /// `index` without pagination, returning the `results` envelope contents.
    pub fn list(
        &self,
        resource: &str,
        search: Option<&str>,
        params: Option<&Map<String, Value>>,
    ) -> Result<Vec<Value>, TaskApiError> {
        let mut payload = Map::new();
        payload.insert("per_page".to_string(), Value::from(PER_PAGE));
        if let Some(search) = search {
            payload.insert("search".to_string(), Value::from(search));
        }
        extend(&mut payload, params);

        let result = self.resource_action(resource, "index", &payload, &CallOptions::default(), false)?;
        Ok(result
            .and_then(|mut r| r.get_mut("results").map(Value::take))
            .and_then(|results| match results {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default())
    }

    pub fn create(
        &self,
        resource: &str,
        desired: &Map<String, Value>,
        params: Option<&Map<String, Value>>,
    ) -> Result<Option<Value>, TaskApiError> {
        let mut payload = desired.clone();
        extend(&mut payload, params);
        self.resource_action(resource, "create", &payload, &CallOptions::default(), false)
    }

    pub fn update(
        &self,
        resource: &str,
        desired: &Map<String, Value>,
        params: Option<&Map<String, Value>>,
    ) -> Result<Option<Value>, TaskApiError> {
        let mut payload = desired.clone();
        extend(&mut payload, params);
        self.resource_action(resource, "update", &payload, &CallOptions::default(), false)
    }

    /// `destroy` the entity identified by `current["id"]`.
    ///
    /// Some servers answer a failed delete with a 2xx carrying
    /// `{"error": {"message": ...}}`; that is reported as an error too.
    pub fn delete(
        &self,
        resource: &str,
        current: &Map<String, Value>,
        params: Option<&Map<String, Value>>,
    ) -> Result<(), TaskApiError> {
        let mut payload = Map::new();
        payload.insert(
            "id".to_string(),
            current.get("id").cloned().unwrap_or(Value::Null),
        );
        extend(&mut payload, params);

        let entity = self.resource_action(resource, "destroy", &payload, &CallOptions::default(), false)?;
        if let Some(message) = entity
            .as_ref()
            .and_then(|e| e.get("error"))
            .and_then(|e| e.get("message"))
        {
            return Err(TaskApiError::Server(param_to_string(message)));
        }
        Ok(())
    }

    /// Reshape `payload` for `action` and report the keys the schema does not know.
    pub fn validate_payload(
        &self,
        resource: &str,
        action: &str,
        payload: &Map<String, Value>,
    ) -> Result<(Map<String, Value>, BTreeSet<String>), TaskApiError> {
        let filtered = self.prepare_params(resource, action, payload)?;
        let known = recursive_keys(&filtered);
        let unsupported = payload
            .keys()
            .filter(|key| !known.contains(key.as_str()))
            .cloned()
            .collect();
        Ok((filtered, unsupported))
    }
}

fn extend(payload: &mut Map<String, Value>, params: Option<&Map<String, Value>>) {
    if let Some(params) = params {
        payload.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// All keys of a nested object, at any depth.
fn recursive_keys(map: &Map<String, Value>) -> BTreeSet<&str> {
    let mut keys = BTreeSet::new();
    for (key, value) in map {
        keys.insert(key.as_str());
        if let Value::Object(nested) = value {
            keys.extend(recursive_keys(nested));
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{cached_config, RecordingTransport};
    use serde_json::json;

    fn doc() -> Value {
        let id = json!({"name": "id", "expected_type": "numeric", "required": true, "validator": "Must be a number."});
        let repository = json!({"name": "repository", "expected_type": "hash", "params": [
            {"name": "name", "expected_type": "string", "required": true},
            {"name": "url", "expected_type": "string", "allow_nil": true}
        ]});
        json!({"docs": {"resources": {
            "foreman_tasks": {"methods": [
                {"name": "show",
                 "apis": [{"api_url": "/foreman_tasks/api/tasks/:id", "http_method": "GET"}],
                 "params": [{"name": "id", "expected_type": "string", "required": true}]}
            ]},
            "repositories": {"methods": [
                {"name": "index",
                 "apis": [
                    {"api_url": "/katello/api/repositories", "http_method": "GET"},
                    {"api_url": "/katello/api/organizations/:organization_id/repositories", "http_method": "GET"}
                 ],
                 "params": [
                    {"name": "organization_id", "expected_type": "numeric"},
                    {"name": "search", "expected_type": "string"},
                    {"name": "per_page", "expected_type": "numeric"}
                 ]},
                {"name": "show",
                 "apis": [{"api_url": "/katello/api/repositories/:id", "http_method": "GET"}],
                 "params": [id]},
                {"name": "create",
                 "apis": [{"api_url": "/katello/api/repositories", "http_method": "POST"}],
                 "params": [{"name": "product_id", "expected_type": "numeric", "required": true}, repository]},
                {"name": "update",
                 "apis": [{"api_url": "/katello/api/repositories/:id", "http_method": "PUT"}],
                 "params": [id, repository]},
                {"name": "destroy",
                 "apis": [{"api_url": "/katello/api/repositories/:id", "http_method": "DELETE"}],
                 "params": [id]},
                {"name": "sync",
                 "apis": [{"api_url": "/katello/api/repositories/:id/sync", "http_method": "POST"}],
                 "params": [id]}
            ]}
        }}})
    }

    fn task(state: &str, result: &str) -> String {
        json!({
            "id": "5b2f7c4e",
            "action": "Synchronize repository",
            "state": state,
            "result": result,
            "started_at": "2024-05-01 10:00:00 UTC",
            "humanized": {"errors": ["Connection refused"]}
        })
        .to_string()
    }

    fn task_api(transport: &RecordingTransport) -> TaskAwareApi {
        let config = cached_config(&doc(), transport);
        TaskAwareApi::with_transport(config, Box::new(transport.clone()))
            .unwrap()
            .task_poll(Duration::from_millis(1))
            .task_timeout(Duration::from_millis(500))
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn sync(api: &TaskAwareApi, ignore_task_errors: bool) -> Result<Option<Value>, TaskApiError> {
        api.resource_action(
            "repositories",
            "sync",
            &obj(json!({"id": 1})),
            &CallOptions::default(),
            ignore_task_errors,
        )
    }

    #[test]
    fn try_as_task_requires_action_state_and_started_at() {
        let recognized = try_as_task(&serde_json::from_str(&task("running", "pending")).unwrap()).unwrap();
        assert_eq!(recognized.id_string(), "5b2f7c4e");
        assert_eq!(recognized.state, "running");
        assert!(!recognized.is_terminal());
        assert_eq!(recognized.humanized_errors, json!(["Connection refused"]));

        assert!(try_as_task(&json!({"action": "x", "state": "stopped"})).is_none());
        assert!(try_as_task(&json!({"id": 1, "name": "repo"})).is_none());
        assert!(try_as_task(&json!([1, 2])).is_none());
    }

    #[test]
    fn api_version_is_forced_to_2() {
        let transport = RecordingTransport::default();
        transport.respond(200, r#"{"id": 1}"#);
        let api = task_api(&transport);
        assert_eq!(api.api().api_version(), 2);

        api.show("repositories", 1, None).unwrap();
        assert!(transport.requests()[0]
            .headers
            .contains(&("Accept".to_string(), "application/json;version=2".to_string())));
    }

    #[test]
    fn waits_for_task_to_stop() {
        let transport = RecordingTransport::default();
        transport.respond(202, &task("planned", "pending"));
        transport.respond(200, &task("running", "pending"));
        transport.respond(200, &task("stopped", "success"));
        let api = task_api(&transport);

        let result = sync(&api, false).unwrap().unwrap();
        assert_eq!(result["state"], "stopped");
        assert_eq!(
            transport.paths(),
            vec![
                "/katello/api/repositories/1/sync",
                "/foreman_tasks/api/tasks/5b2f7c4e",
                "/foreman_tasks/api/tasks/5b2f7c4e",
            ]
        );
    }

    #[test]
    fn paused_is_terminal() {
        let transport = RecordingTransport::default();
        transport.respond(202, &task("running", "pending"));
        transport.respond(200, &task("paused", "success"));
        let api = task_api(&transport);
        let result = sync(&api, false).unwrap().unwrap();
        assert_eq!(result["state"], "paused");
    }

    #[test]
    fn task_that_never_finishes_times_out() {
        let transport = RecordingTransport::default();
        transport.respond(202, &task("running", "pending"));
        for _ in 0..10 {
            transport.respond(200, &task("running", "pending"));
        }
        let api = task_api(&transport).task_timeout(Duration::from_millis(3));

        let err = sync(&api, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error while performing sync on repositories: Timeout waiting for Task 5b2f7c4e"
        );
        // 3ms budget with a 1ms poll: two polls, then the budget is gone.
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn zero_poll_interval_still_times_out() {
        let transport = RecordingTransport::default();
        transport.respond(202, &task("running", "pending"));
        for _ in 0..10 {
            transport.respond(200, &task("running", "pending"));
        }
        let api = task_api(&transport)
            .task_poll(Duration::ZERO)
            .task_timeout(Duration::from_millis(3));

        let err = sync(&api, false).unwrap_err();
        assert!(err.to_string().ends_with("Timeout waiting for Task 5b2f7c4e"));
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn wait_for_task_reports_timeout_directly() {
        let transport = RecordingTransport::default();
        let api = task_api(&transport).task_timeout(Duration::from_millis(1));
        let running = try_as_task(&serde_json::from_str(&task("running", "pending")).unwrap()).unwrap();
        let err = api.wait_for_task(running, false).unwrap_err();
        assert!(matches!(err, TaskApiError::Timeout { ref id } if id == "5b2f7c4e"));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn failed_task_is_an_error_unless_ignored() {
        let transport = RecordingTransport::default();
        transport.respond(202, &task("stopped", "error"));
        transport.respond(202, &task("stopped", "error"));
        let api = task_api(&transport);

        let err = sync(&api, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Error while performing sync on repositories: Task Synchronize repository(5b2f7c4e) did not succeed. Task information: ["Connection refused"]"#
        );

        let result = sync(&api, true).unwrap().unwrap();
        assert_eq!(result["result"], "error");
    }

    #[test]
    fn http_errors_carry_the_server_message() {
        let transport = RecordingTransport::default();
        transport.respond(422, r#"{"error": {"message": "Name has already been taken"}}"#);
        let api = task_api(&transport);

        let err = api
            .create(
                "repositories",
                &obj(json!({"name": "zoo", "product_id": 3})),
                None,
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Error while performing create on repositories: HTTP 422: {"error": {"message": "Name has already been taken"}} - {"message":"Name has already been taken"}"#
        );
        let source = std::error::Error::source(&err).unwrap();
        assert!(matches!(
            source.downcast_ref::<ApiError>(),
            Some(ApiError::HttpError { status: 422, .. })
        ));
    }

    #[test]
    fn create_nests_flat_payload() {
        let transport = RecordingTransport::default();
        transport.respond(201, r#"{"id": 9}"#);
        let api = task_api(&transport);

        let result = api
            .create(
                "repositories",
                &obj(json!({"name": "zoo", "url": "https://example.com/zoo"})),
                Some(&obj(json!({"product_id": 3}))),
            )
            .unwrap();
        assert_eq!(result, Some(json!({"id": 9})));
        assert_eq!(
            transport.requests()[0].body,
            crate::transport::RequestBody::Json(json!({
                "product_id": 3,
                "repository": {"name": "zoo", "url": "https://example.com/zoo"}
            }))
        );
    }

    #[test]
    fn update_uses_id_route() {
        let transport = RecordingTransport::default();
        transport.respond(200, r#"{"id": 9, "name": "zoo2"}"#);
        let api = task_api(&transport);
        api.update("repositories", &obj(json!({"id": 9, "name": "zoo2"})), None)
            .unwrap();
        let request = &transport.requests()[0];
        assert_eq!(request.method, reqwest::Method::PUT);
        assert_eq!(request.url.path(), "/katello/api/repositories/9");
        assert_eq!(
            request.body,
            crate::transport::RequestBody::Json(json!({"repository": {"name": "zoo2"}}))
        );
    }

    #[test]
    fn list_unwraps_results_without_pagination() {
        let transport = RecordingTransport::default();
        transport.respond(200, r#"{"total": 2, "results": [{"id": 1}, {"id": 2}]}"#);
        transport.respond(204, "");
        let api = task_api(&transport);

        let results = api
            .list(
                "repositories",
                Some("name = zoo"),
                Some(&obj(json!({"organization_id": 1}))),
            )
            .unwrap();
        assert_eq!(results, vec![json!({"id": 1}), json!({"id": 2})]);

        let request = &transport.requests()[0];
        assert_eq!(request.url.path(), "/katello/api/organizations/1/repositories");
        assert_eq!(
            request.query,
            vec![
                ("per_page".to_string(), "4294967296".to_string()),
                ("search".to_string(), "name = zoo".to_string()),
            ]
        );

        assert!(api.list("repositories", None, None).unwrap().is_empty());
    }

    #[test]
    fn delete_reports_error_hidden_in_success_response() {
        let transport = RecordingTransport::default();
        transport.respond(200, r#"{"error": {"message": "Cannot delete record because of dependent hosts"}}"#);
        transport.respond(200, r#"{"id": 1, "name": "zoo"}"#);
        let api = task_api(&transport);
        let current = obj(json!({"id": 1, "name": "zoo"}));

        let err = api.delete("repositories", &current, None).unwrap_err();
        assert!(matches!(err, TaskApiError::Server(_)));
        assert_eq!(err.to_string(), "Cannot delete record because of dependent hosts");

        api.delete("repositories", &current, None).unwrap();
        assert_eq!(transport.requests()[1].method, reqwest::Method::DELETE);
    }

    #[test]
    fn unknown_resource_asks_for_plugin() {
        let api = task_api(&RecordingTransport::default());
        let err = api.resource("hosts").unwrap_err();
        assert_eq!(
            err.to_string(),
            "The server doesn't know about hosts, is the right plugin installed?"
        );

        let err = api.show("hosts", 1, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error while performing show on hosts: The server doesn't know about hosts, is the right plugin installed?"
        );
    }

    #[test]
    fn validate_payload_reports_unknown_keys() {
        let api = task_api(&RecordingTransport::default());
        let (filtered, unsupported) = api
            .validate_payload(
                "repositories",
                "create",
                &obj(json!({"name": "zoo", "url": "u", "product_id": 3, "checksum_type": "sha256"})),
            )
            .unwrap();
        assert_eq!(
            Value::Object(filtered),
            json!({"product_id": 3, "repository": {"name": "zoo", "url": "u"}})
        );
        assert_eq!(unsupported, BTreeSet::from(["checksum_type".to_string()]));
    }
}
