//! Open extension sync against an in-memory Graph endpoint.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bytes::Bytes;
use core_auth::{AuthProvider, MockProvider, ProviderManager};
use core_roaming::{GraphClient, RoamingError, RoamingSettingsStore, UserExtensionStorageHelper};
use core_runtime::events::{CoreEvent, EventBus, EventStream, RoamingEvent};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const GRAPH_ROOT: &str = "https://graph.microsoft.com/v1.0/";
const EXTENSION_PATH: &str = "users/user-1/extensions/com.contoso.settings";

/// Serves `/me` and one open extension for `user-1`.
#[derive(Default)]
struct FakeGraph {
    extension: Mutex<Option<Map<String, Value>>>,
    requests: AtomicUsize,
}

impl FakeGraph {
    fn with_extension(values: Value) -> Self {
        let graph = Self::default();
        if let Value::Object(map) = values {
            *graph.extension.lock().unwrap() = Some(map);
        }
        graph
    }

    fn extension(&self) -> Option<Map<String, Value>> {
        self.extension.lock().unwrap().clone()
    }

    fn path(request: &HttpRequest) -> String {
        // The mock provider routes requests through the sandbox proxy.
        let target = match request.url.split_once("?url=") {
            Some((_, encoded)) => urlencoding::decode(encoded).unwrap().into_owned(),
            None => request.url.clone(),
        };
        target.trim_start_matches(GRAPH_ROOT).to_string()
    }

    fn reply(status: u16, body: Value) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn settings(body: &Option<Bytes>) -> Map<String, Value> {
        let mut map: Map<String, Value> = body
            .as_ref()
            .map(|b| serde_json::from_slice(b).unwrap())
            .unwrap_or_default();
        map.remove("@odata.type");
        map.remove("extensionName");
        map
    }
}

#[async_trait]
impl HttpClient for FakeGraph {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let path = Self::path(&request);
        let mut extension = self.extension.lock().unwrap();

        let response = match (request.method, path.as_str()) {
            (HttpMethod::Get, "me") => Self::reply(200, json!({ "id": "user-1" })),
            (HttpMethod::Get, EXTENSION_PATH) => match extension.as_ref() {
                Some(values) => {
                    let mut body = values.clone();
                    body.insert("@odata.context".into(), json!("https://graph/$metadata"));
                    body.insert("id".into(), json!("com.contoso.settings"));
                    body.insert("extensionName".into(), json!("com.contoso.settings"));
                    Self::reply(200, Value::Object(body))
                }
                None => Self::reply(404, json!({ "error": { "message": "not found" } })),
            },
            (HttpMethod::Patch, EXTENSION_PATH) => match extension.as_mut() {
                Some(values) => {
                    values.extend(Self::settings(&request.body));
                    Self::reply(204, Value::Null)
                }
                None => Self::reply(404, json!({ "error": { "message": "not found" } })),
            },
            (HttpMethod::Post, "users/user-1/extensions") => {
                if extension.is_some() {
                    Self::reply(409, json!({ "error": { "message": "exists" } }))
                } else {
                    *extension = Some(Self::settings(&request.body));
                    Self::reply(201, json!({ "id": "com.contoso.settings" }))
                }
            }
            (HttpMethod::Delete, EXTENSION_PATH) => match extension.take() {
                Some(_) => Self::reply(204, Value::Null),
                None => Self::reply(404, Value::Null),
            },
            _ => Self::reply(400, json!({ "error": { "message": path } })),
        };
        Ok(response)
    }
}

struct Fixture {
    graph: Arc<FakeGraph>,
    settings: RoamingSettingsStore,
    events: EventStream,
}

fn fixture(graph: FakeGraph, signed_in: bool) -> Fixture {
    let graph = Arc::new(graph);
    let providers = ProviderManager::new(EventBus::new(64));
    let provider: Arc<dyn AuthProvider> =
        Arc::new(MockProvider::new(signed_in, Duration::ZERO, "graph-toolkit-rs/test"));
    providers.set_global_provider(Some(provider));

    let client = GraphClient::new(graph.clone(), providers.clone(), GRAPH_ROOT);
    let remote = UserExtensionStorageHelper::new(client, "com.contoso.settings").unwrap();
    let events = EventStream::new(providers.event_bus().subscribe())
        .filter(|event| matches!(event, CoreEvent::Roaming(_)));
    let settings = RoamingSettingsStore::new(Arc::new(remote), providers.event_bus().clone());

    Fixture {
        graph,
        settings,
        events,
    }
}

async fn next_roaming_event(events: &mut EventStream) -> RoamingEvent {
    match tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
    {
        CoreEvent::Roaming(event) => event,
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn sync_when_signed_out_fails_and_leaves_cache_unchanged() {
    let mut fixture = fixture(FakeGraph::with_extension(json!({ "B": 3 })), false);
    fixture.settings.save("A", &1).unwrap();

    let result = fixture.settings.sync().await;

    assert!(matches!(result, Err(RoamingError::NotAuthenticated)));
    assert!(matches!(
        next_roaming_event(&mut fixture.events).await,
        RoamingEvent::SyncFailed {
            remote_missing: false,
            ..
        }
    ));
    assert_eq!(fixture.settings.keys(), vec!["A".to_string()]);
    assert_eq!(fixture.settings.read("A", 0), 1);
    assert_eq!(fixture.graph.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sync_merges_local_and_remote() {
    let mut fixture = fixture(FakeGraph::with_extension(json!({ "A": 2, "B": 3 })), true);
    fixture.settings.save("A", &1).unwrap();

    let report = fixture.settings.sync().await.unwrap();

    assert_eq!((report.pushed, report.pulled), (1, 1));
    assert_eq!(fixture.settings.keys(), vec!["A".to_string(), "B".to_string()]);
    assert_eq!(fixture.settings.read("A", 0), 1);
    assert_eq!(fixture.settings.read("B", 0), 3);
    assert!(!fixture.settings.contains_key("@odata.context"));

    let remote = fixture.graph.extension().unwrap();
    assert_eq!(remote.get("A"), Some(&json!(1)));
    assert_eq!(remote.get("B"), Some(&json!(3)));
    assert!(!remote.contains_key("@odata.context"));

    assert_eq!(
        next_roaming_event(&mut fixture.events).await,
        RoamingEvent::SyncCompleted {
            store_id: "com.contoso.settings".into(),
            pushed: 1,
            pulled: 1,
        }
    );
}

#[tokio::test]
async fn missing_extension_is_created_then_synced() {
    let mut fixture = fixture(FakeGraph::default(), true);
    fixture.settings.save("theme", "dark").unwrap();

    let error = fixture.settings.sync().await.unwrap_err();
    assert!(error.is_remote_missing());
    assert!(matches!(
        next_roaming_event(&mut fixture.events).await,
        RoamingEvent::SyncFailed {
            remote_missing: true,
            ..
        }
    ));

    fixture.settings.create_remote().await.unwrap();
    fixture.settings.create_remote().await.unwrap();
    fixture.settings.sync().await.unwrap();

    assert_eq!(
        fixture.graph.extension().unwrap().get("theme"),
        Some(&json!("dark"))
    );
}

#[tokio::test]
async fn delete_empties_cache_and_remote() {
    let mut fixture = fixture(FakeGraph::with_extension(json!({ "B": 3 })), true);
    fixture.settings.sync().await.unwrap();
    assert!(fixture.settings.contains_key("B"));
    let _ = next_roaming_event(&mut fixture.events).await;

    fixture.settings.delete().await.unwrap();

    assert!(fixture.settings.keys().is_empty());
    assert!(fixture.graph.extension().is_none());
    assert_eq!(
        next_roaming_event(&mut fixture.events).await,
        RoamingEvent::StoreDeleted {
            store_id: "com.contoso.settings".into()
        }
    );
}

#[tokio::test]
async fn delete_empties_cache_when_signed_out() {
    let fixture = fixture(FakeGraph::default(), false);
    fixture.settings.save("A", &1).unwrap();

    assert!(fixture.settings.delete().await.is_err());
    assert!(fixture.settings.keys().is_empty());
}
