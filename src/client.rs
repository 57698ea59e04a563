use crate::error::{Error, Result};
use crate::models::{ChangeEvent, Issue, StatusType};
use reqwest::{Client, Response, header};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// 1ページあたりの件数（スクロール検索）
pub const SCROLL_PAGE_SIZE: usize = 500;
/// スクロールカーソルの有効期間（ミリ秒）
pub const SCROLL_TTL_MILLIS: u64 = 60_000;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const TOTAL_COUNT_HEADER: &str = "X-Total-Count";
pub const SCROLL_ID_HEADER: &str = "X-Scroll-Id";
pub const SCROLL_TOKEN_HEADER: &str = "X-Scroll-Token";

#[derive(Debug, Clone)]
pub enum Auth {
    /// `Authorization: OAuth <token>`
    OAuth { token: String },
    /// `Authorization: Bearer <iam-token>`
    Bearer { token: String },
}

/// 組織の種別（送るヘッダーが異なる）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgScope {
    /// `X-Org-ID`
    Org(String),
    /// `X-Cloud-Org-ID`
    CloudOrg(String),
}

impl OrgScope {
    pub fn id(&self) -> &str {
        match self {
            OrgScope::Org(id) | OrgScope::CloudOrg(id) => id,
        }
    }

    fn header_name(&self) -> &'static str {
        match self {
            OrgScope::Org(_) => "X-Org-ID",
            OrgScope::CloudOrg(_) => "X-Cloud-Org-ID",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub base_url: String,
    pub auth: Auth,
    pub org: OrgScope,
    pub timeout: Duration,
}

impl TrackerConfig {
    pub fn new(base_url: impl Into<String>, auth: Auth, org: OrgScope) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        // Validate URL
        let _ = Url::parse(&base_url)
            .map_err(|_| Error::InvalidConfiguration("Invalid base URL".to_string()))?;

        if org.id().is_empty() {
            return Err(Error::InvalidConfiguration(
                "Organization id must not be empty".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            auth,
            org,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// スクロール検索の継続に使うカーソル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollCursor {
    pub id: String,
    pub token: String,
}

/// 検索1ページ分のレスポンス
///
/// ヘッダーは生の値のまま保持し、解釈はページネーション側で行う。
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub issues: Vec<Issue>,
    pub total_count: Option<String>,
    pub scroll_id: Option<String>,
    pub scroll_token: Option<String>,
}

impl SearchPage {
    /// 両方のスクロールヘッダーが揃っている場合のみカーソルを返す
    pub fn cursor(&self) -> Option<ScrollCursor> {
        match (&self.scroll_id, &self.scroll_token) {
            (Some(id), Some(token)) => Some(ScrollCursor {
                id: id.clone(),
                token: token.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerClient {
    pub(crate) client: Client,
    pub(crate) config: Arc<TrackerConfig>,
}

impl TrackerClient {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        // 認証ヘッダーを追加
        let auth_value = match &config.auth {
            Auth::OAuth { token } => format!("OAuth {}", token),
            Auth::Bearer { token } => format!("Bearer {}", token),
        };
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&auth_value)
                .map_err(|_| Error::InvalidConfiguration("Invalid auth header".to_string()))?,
        );

        // 組織ヘッダーを追加
        headers.insert(
            config.org.header_name(),
            header::HeaderValue::from_str(config.org.id())
                .map_err(|_| Error::InvalidConfiguration("Invalid org header".to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Unexpected(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url, endpoint)
    }

    /// 非2xxをエラーに変換（429は再試行対象として区別）
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimitExceeded);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(Error::ApiError {
            status: status.as_u16(),
            message,
        })
    }

    pub(crate) async fn get<T>(&self, endpoint: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.client.get(self.url(endpoint)).send().await?;
        let response = Self::check_status(response).await?;

        let data = response.json::<T>().await?;
        Ok(data)
    }

    pub(crate) async fn post<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let response = self.client.post(self.url(endpoint)).json(body).send().await?;
        let response = Self::check_status(response).await?;

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// 検索の最初のページを取得
    pub async fn search_first_page(&self, query: &str) -> Result<SearchPage> {
        let endpoint = format!(
            "/issues/_search?scrollType=unsorted&perScroll={}&scrollTTLMillis={}",
            SCROLL_PAGE_SIZE, SCROLL_TTL_MILLIS
        );
        self.search(&endpoint, query).await
    }

    /// スクロールカーソルで続きのページを取得
    pub async fn search_next_page(&self, query: &str, cursor: &ScrollCursor) -> Result<SearchPage> {
        let endpoint = format!(
            "/issues/_search?scrollId={}&scrollToken={}",
            urlencoding::encode(&cursor.id),
            urlencoding::encode(&cursor.token)
        );
        self.search(&endpoint, query).await
    }

    async fn search(&self, endpoint: &str, query: &str) -> Result<SearchPage> {
        let body = serde_json::json!({ "query": query });
        let response = self
            .client
            .post(self.url(endpoint))
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let header_value = |name: &str| -> Result<Option<String>> {
            response
                .headers()
                .get(name)
                .map(|value| {
                    value
                        .to_str()
                        .map(str::to_string)
                        .map_err(|_| Error::InvalidHeader(format!("{} is not valid text", name)))
                })
                .transpose()
        };
        let total_count = header_value(TOTAL_COUNT_HEADER)?;
        let scroll_id = header_value(SCROLL_ID_HEADER)?;
        let scroll_token = header_value(SCROLL_TOKEN_HEADER)?;

        let issues = response.json::<Vec<Issue>>().await?;

        Ok(SearchPage {
            issues,
            total_count,
            scroll_id,
            scroll_token,
        })
    }

    /// 課題の変更履歴（ワークフロー変更）を取得
    pub async fn get_changelog(&self, issue_key: &str) -> Result<Vec<ChangeEvent>> {
        let endpoint = format!(
            "/issues/{}/changelog?type=IssueWorkflow",
            urlencoding::encode(issue_key)
        );
        self.get(&endpoint).await
    }

    /// 組織のステータス定義一覧を取得
    pub async fn get_status_types(&self) -> Result<Vec<StatusType>> {
        self.get("/statuses/").await
    }

    /// フィルタに一致する課題数を取得
    pub async fn count_issues(&self, query: &str) -> Result<u64> {
        let body = serde_json::json!({ "query": query });
        self.post("/issues/_count", &body).await
    }
}

/// キャンセルされたら実行中のリクエストを破棄して `Error::Cancelled` を返す
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}
