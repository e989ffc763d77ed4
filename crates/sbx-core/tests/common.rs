#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fs,
    path::Path,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use sbx_core::{ApiRequest, ApiResponse, Method, Transport, TransportError};

pub const UPLOAD_HOST: &str = "https://uploads.test";

type Reply = Result<Value, TransportError>;

/// In-memory stand-in for the service. Each route replays its scripted
/// replies in order and keeps repeating the last one. `POST templates/files`
/// is answered from a content store that `put_bytes` fills, unless a test
/// scripts that route itself.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<ApiRequest>>,
    stored: Mutex<HashSet<String>>,
    puts: Mutex<Vec<(String, usize)>>,
    put_failure: Mutex<Option<TransportError>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, method: Method, path: &str, replies: Vec<Reply>) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((method, path.to_string()), replies.into());
    }

    pub fn reply(&self, method: Method, path: &str, body: Value) {
        self.script(method, path, vec![Ok(body)]);
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method && call.path == path)
            .collect()
    }

    pub fn puts(&self) -> Vec<(String, usize)> {
        self.puts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Makes every later `put_bytes` fail with `err` without storing anything.
    pub fn fail_puts(&self, err: TransportError) {
        *self
            .put_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    fn next_reply(&self, method: Method, path: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = routes.get_mut(&(method, path.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn upload_link(&self, request: &ApiRequest) -> Reply {
        let hash = request
            .body
            .as_ref()
            .and_then(|body| body["files_hash"].as_str())
            .unwrap_or_default()
            .to_string();
        let present = self
            .stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&hash);
        if present {
            Ok(json!({ "present": true }))
        } else {
            Ok(json!({
                "present": false,
                "upload_url": format!("{UPLOAD_HOST}/{hash}"),
            }))
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let reply = match self.next_reply(request.method, &request.path) {
            Some(reply) => reply,
            None if request.method == Method::Post && request.path == "templates/files" => {
                self.upload_link(&request)
            }
            None => Err(TransportError::from_status(
                &request.path,
                404,
                "no scripted route",
            )),
        };
        reply.map(ApiResponse::ok)
    }

    async fn put_bytes(&self, url: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let failure = self
            .put_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(err) = failure {
            return Err(err);
        }
        if let Some(hash) = url.strip_prefix(&format!("{UPLOAD_HOST}/")) {
            self.stored
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(hash.to_string());
        }
        self.puts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((url.to_string(), bytes.len()));
        Ok(())
    }
}

/// Routes pipeline events to the test harness output; `RUST_LOG` overrides
/// the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sbx_core=debug,sbx::build_log=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(false)
        .try_init();
}

pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(path, contents).expect("write fixture file");
}

/// Scripts a build that is accepted, finishes after one pending poll and
/// publishes a template that is active right away.
pub fn script_successful_build(
    transport: &ScriptedTransport,
    build_id: &str,
    template_id: &str,
) {
    transport.reply(
        Method::Post,
        "templates/builds",
        json!({ "build_id": build_id, "template_id": template_id, "status": "waiting" }),
    );
    transport.script(
        Method::Get,
        &format!("templates/builds/{build_id}"),
        vec![
            Ok(build_status(build_id, template_id, "building")),
            Ok(build_status(build_id, template_id, "completed")),
        ],
    );
    transport.reply(
        Method::Get,
        &format!("templates/{template_id}"),
        template_status("active", true),
    );
}

pub fn build_status(build_id: &str, template_id: &str, status: &str) -> Value {
    json!({ "build_id": build_id, "template_id": template_id, "status": status })
}

pub fn template_status(status: &str, is_active: bool) -> Value {
    json!({ "status": status, "is_active": is_active })
}
