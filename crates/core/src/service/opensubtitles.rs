//! OpenSubtitles.org XML-RPC client.
//! Requests are encoded and decoded by the `xmlrpc` crate and carried over a
//! blocking reqwest client so the user agent and TLS setup stay ours.

use super::{EncodedSubtitle, Language, RawRecord, ServiceError, Session, SubtitleService};
use crate::scan::VideoFile;
use anyhow::Result;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::CONTENT_TYPE;
use std::collections::BTreeMap;
use tracing::{debug, trace};
use xmlrpc::{Request, Transport, Value};

/// Public XML-RPC endpoint of OpenSubtitles.org.
pub const DEFAULT_ENDPOINT: &str = "https://api.opensubtitles.org/xml-rpc";
/// User agent accepted by the service for development use.
pub const DEFAULT_USER_AGENT: &str = "TemporaryUserAgent";

/// Interface language passed at login; it only affects server messages.
const LOGIN_LANGUAGE: &str = "en";

type StructValue = BTreeMap<String, Value>;

/// Subtitle service backed by the OpenSubtitles.org XML-RPC API.
pub struct OpenSubtitlesClient {
    client: Client,
    endpoint: String,
    user_agent: String,
}

impl OpenSubtitlesClient {
    /// Create a client talking to `endpoint` and identifying as `user_agent`.
    pub fn new(endpoint: impl Into<String>, user_agent: impl Into<String>) -> Result<Self> {
        let user_agent = user_agent.into();
        let client = Client::builder().user_agent(user_agent.clone()).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            user_agent,
        })
    }

    /// Perform `method` and return the response struct without looking at
    /// its status.
    fn call_raw(&self, method: &'static str, args: Vec<Value>) -> Result<StructValue, ServiceError> {
        trace!("call_raw(method={}, endpoint={})", method, self.endpoint);
        let request = args
            .into_iter()
            .fold(Request::new(method), |request, arg| request.arg(arg));
        let transport = HttpTransport {
            builder: self.client.post(&self.endpoint),
        };
        match request.call(transport) {
            Ok(Value::Struct(fields)) => Ok(fields),
            Ok(_) => Err(ServiceError::Malformed {
                method,
                reason: "response is not a struct".into(),
            }),
            Err(err) => Err(ServiceError::Transport {
                method,
                message: err.to_string(),
            }),
        }
    }

    /// Perform `method` and fail unless the service reports `200 OK`.
    fn call(&self, method: &'static str, args: Vec<Value>) -> Result<StructValue, ServiceError> {
        let fields = self.call_raw(method, args)?;
        let status = status_of(method, &fields)?;
        if !status.starts_with("200") {
            return Err(ServiceError::Status { method, status });
        }
        Ok(fields)
    }
}

impl SubtitleService for OpenSubtitlesClient {
    fn login(&self, username: &str, password: &str) -> Result<Session> {
        let method = "LogIn";
        let fields = self.call_raw(
            method,
            vec![
                Value::String(username.to_string()),
                Value::String(password.to_string()),
                Value::String(LOGIN_LANGUAGE.to_string()),
                Value::String(self.user_agent.clone()),
            ],
        )?;
        let status = status_of(method, &fields)?;
        if status.starts_with("401") {
            return Err(ServiceError::Authentication(status).into());
        }
        if !status.starts_with("200") {
            return Err(ServiceError::Status { method, status }.into());
        }
        match fields.get("token") {
            Some(Value::String(token)) if !token.is_empty() => {
                debug!("logged in as {}", username);
                Ok(Session::new(token.clone()))
            }
            _ => Err(ServiceError::Malformed {
                method,
                reason: "missing token".into(),
            }
            .into()),
        }
    }

    fn search(
        &self,
        session: &Session,
        language: Language,
        video: &VideoFile,
    ) -> Result<Vec<RawRecord>> {
        let method = "SearchSubtitles";
        let mut query = StructValue::new();
        query.insert(
            "sublanguageid".into(),
            Value::String(language.code().to_string()),
        );
        query.insert("moviehash".into(), Value::String(video.hash.clone()));
        query.insert("moviebytesize".into(), Value::String(video.size.to_string()));
        let fields = self.call(
            method,
            vec![
                Value::String(session.token().to_string()),
                Value::Array(vec![Value::Struct(query)]),
            ],
        )?;
        let records = match fields.get("data") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::Struct(record) => Some(flatten_record(record)),
                    _ => None,
                })
                .collect(),
            // No match is reported as `data: false` rather than an empty array.
            Some(Value::Bool(false)) | None => Vec::new(),
            Some(_) => {
                return Err(ServiceError::Malformed {
                    method,
                    reason: "data is neither an array nor false".into(),
                }
                .into())
            }
        };
        debug!("{} results for {}", records.len(), video.path.display());
        Ok(records)
    }

    fn download(&self, session: &Session, file_ids: &[String]) -> Result<Vec<EncodedSubtitle>> {
        let method = "DownloadSubtitles";
        let ids = file_ids.iter().cloned().map(Value::String).collect();
        let fields = self.call(
            method,
            vec![
                Value::String(session.token().to_string()),
                Value::Array(ids),
            ],
        )?;
        let items = match fields.get("data") {
            Some(Value::Array(items)) => items,
            Some(Value::Bool(false)) | None => return Ok(Vec::new()),
            Some(_) => {
                return Err(ServiceError::Malformed {
                    method,
                    reason: "data is neither an array nor false".into(),
                }
                .into())
            }
        };
        let mut subtitles = Vec::with_capacity(items.len());
        for item in items {
            let Value::Struct(record) = item else {
                continue;
            };
            let field = |name: &str| record.get(name).and_then(scalar_to_string);
            match (field("idsubtitlefile"), field("data")) {
                (Some(file_id), Some(data)) => subtitles.push(EncodedSubtitle { file_id, data }),
                _ => {
                    return Err(ServiceError::Malformed {
                        method,
                        reason: "download entry without idsubtitlefile or data".into(),
                    }
                    .into())
                }
            }
        }
        Ok(subtitles)
    }

    fn logout(&self, session: Session) -> Result<()> {
        self.call("LogOut", vec![Value::String(session.token().to_string())])?;
        debug!("logged out");
        Ok(())
    }
}

/// Carries an encoded request over the reqwest client.
struct HttpTransport {
    builder: RequestBuilder,
}

impl Transport for HttpTransport {
    type Stream = Response;

    fn transmit(
        self,
        request: &Request<'_>,
    ) -> std::result::Result<Response, Box<dyn std::error::Error + Send + Sync>> {
        let mut body = Vec::new();
        request.write_as_xml(&mut body)?;
        let response = self
            .builder
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()?
            .error_for_status()?;
        Ok(response)
    }
}

/// Read the `status` member every response carries.
/// A response without one is malformed.
fn status_of(method: &'static str, fields: &StructValue) -> Result<String, ServiceError> {
    match fields.get("status") {
        Some(Value::String(status)) => Ok(status.clone()),
        _ => Err(ServiceError::Malformed {
            method,
            reason: "missing status".into(),
        }),
    }
}

/// Keep the scalar members of a search result as strings.
fn flatten_record(record: &StructValue) -> RawRecord {
    record
        .iter()
        .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k.clone(), v)))
        .collect()
}

/// Render a scalar the way it would read as text.
/// Nested structs, arrays and binary values have no rendering.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Int64(i) => Some(i.to_string()),
        Value::Double(d) => Some(d.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}
