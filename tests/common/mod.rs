//! 結合テスト用のモックTrackerサーバー
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tracker_import::{Auth, OrgScope, TrackerClient, TrackerConfig};
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const ORG_ID: &str = "org-1";

pub fn issue_key(n: usize) -> String {
    format!("PROJ-{}", n)
}

pub fn issue_json(n: usize) -> Value {
    json!({
        "id": format!("id-{}", n),
        "key": issue_key(n),
        "summary": format!("Issue {}", n),
        "status": {"key": "open", "display": "Open"},
        "queue": {"key": "PROJ", "display": "Project"},
        "updatedAt": "2025-03-29T10:00:00.000+0000",
        "votes": 0
    })
}

/// `PROJ-n` の変更イベント数（0〜5件）
pub fn events_for(n: usize) -> usize {
    n % 6
}

/// `1..=count` の課題が持つ変更イベント総数
pub fn total_events(count: usize) -> usize {
    (1..=count).map(events_for).sum()
}

pub fn tracker_client(base_url: String) -> TrackerClient {
    let config = TrackerConfig::new(
        base_url,
        Auth::OAuth {
            token: "token".to_string(),
        },
        OrgScope::Org(ORG_ID.to_string()),
    )
    .unwrap();
    TrackerClient::new(config).unwrap()
}

/// `1..=count` の課題を500件ずつのスクロールで返す
///
/// 各ページのモックはちょうど1回呼ばれることを期待する。
pub async fn mount_scroll_search(server: &MockServer, count: usize) {
    let pages: Vec<Vec<usize>> = (1..=count)
        .collect::<Vec<_>>()
        .chunks(500)
        .map(|chunk| chunk.to_vec())
        .collect();

    for (index, page) in pages.iter().enumerate() {
        let body: Vec<Value> = page.iter().map(|n| issue_json(*n)).collect();
        let mut response = ResponseTemplate::new(200)
            .insert_header("X-Total-Count", count.to_string().as_str())
            .set_body_json(body);
        if index + 1 < pages.len() {
            response = response
                .insert_header("X-Scroll-Id", format!("scroll-{}", index + 1).as_str())
                .insert_header("X-Scroll-Token", format!("token-{}", index + 1).as_str());
        }

        let mock = Mock::given(method("POST")).and(path("/issues/_search"));
        let mock = if index == 0 {
            mock.and(query_param("scrollType", "unsorted"))
        } else {
            mock.and(query_param("scrollId", format!("scroll-{}", index).as_str()))
                .and(query_param("scrollToken", format!("token-{}", index).as_str()))
        };
        mock.respond_with(response).expect(1).mount(server).await;
    }
}

pub async fn mount_status_types(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/statuses/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "version": 3, "key": "open", "name": "Open", "order": 1, "type": "new"},
            {"id": 2, "version": 1, "key": "inProgress", "name": "In progress", "order": 2, "type": "inProgress"},
            {"id": 3, "version": 5, "key": "closed", "name": "Closed", "order": 3, "type": "done"}
        ])))
        .mount(server)
        .await;
}

/// 課題番号に応じて0〜5件のイベントを返す変更履歴レスポンダ
///
/// `throttle_once` の課題には最初の1回だけ429を、`always_throttle` の
/// 課題には毎回429を返す。
#[derive(Clone, Default)]
pub struct ChangelogResponder {
    throttle_once: HashSet<String>,
    always_throttle: HashSet<String>,
    delay: Option<Duration>,
    throttled: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl ChangelogResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn throttle_once(mut self, keys: &[&str]) -> Self {
        self.throttle_once = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn always_throttle(mut self, keys: &[&str]) -> Self {
        self.always_throttle = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 課題キーごとの受信回数
    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub async fn mount(self, server: &MockServer) -> Self {
        Mock::given(method("GET"))
            .and(path_regex(r"^/issues/[^/]+/changelog$"))
            .respond_with(self.clone())
            .mount(server)
            .await;
        self
    }
}

impl Respond for ChangelogResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let key = request
            .url
            .path()
            .trim_start_matches("/issues/")
            .trim_end_matches("/changelog")
            .to_string();
        *self.calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        if self.always_throttle.contains(&key)
            || (self.throttle_once.contains(&key) && self.throttled.lock().unwrap().insert(key.clone()))
        {
            return ResponseTemplate::new(429);
        }

        let n: usize = key
            .trim_start_matches("PROJ-")
            .parse()
            .unwrap_or_default();
        let events: Vec<Value> = (1..=events_for(n))
            .map(|j| {
                json!({
                    "id": format!("{}-event-{}", key, j),
                    "issue": {"key": key},
                    "updatedAt": format!("2025-03-{:02}T10:00:00.000+0000", j),
                    "updatedBy": {"id": "42", "display": "Alice"},
                    "type": "IssueWorkflow",
                    "fields": [
                        {"field": {"id": "status", "display": "Status"},
                         "from": {"key": "open", "display": "Open"},
                         "to": {"key": "closed", "display": "Closed"}}
                    ]
                })
            })
            .collect();

        let response = ResponseTemplate::new(200).set_body_json(events);
        match self.delay {
            Some(delay) => response.set_delay(delay),
            None => response,
        }
    }
}

/// 検索リクエストの受信数
pub async fn search_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == "/issues/_search")
        .count()
}
