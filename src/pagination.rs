//! スクロールカーソルによる課題の全件取得

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{
    SCROLL_ID_HEADER, SCROLL_TOKEN_HEADER, ScrollCursor, SearchPage, TOTAL_COUNT_HEADER, TrackerClient,
    cancellable,
};
use crate::error::{Error, Result};
use crate::models::Issue;

/// 更新日時の窓をフィルタの先頭に付与
///
/// `depth` が空なら元のクエリをそのまま返す。
pub fn apply_history_depth(query: &str, depth: Option<&str>) -> String {
    let depth = match depth.map(str::trim) {
        Some(d) if !d.is_empty() => d,
        _ => return query.to_string(),
    };

    let time_filter = format!("updated: >now()-{}", depth);
    if query.is_empty() {
        time_filter
    } else {
        format!("{} {}", time_filter, query)
    }
}

/// `X-Total-Count` ヘッダーを件数として解釈
pub fn parse_total_count(raw: Option<&str>) -> Result<usize> {
    let raw = raw.ok_or_else(|| {
        Error::Protocol(format!("missing {} header in search response", TOTAL_COUNT_HEADER))
    })?;
    raw.trim().parse::<usize>().map_err(|e| {
        Error::Protocol(format!(
            "failed to parse total count {:?} from {} header: {}",
            raw, TOTAL_COUNT_HEADER, e
        ))
    })
}

/// 検索APIから課題を全件取得するフェッチャー
#[derive(Debug, Clone)]
pub struct IssuePaginator {
    client: TrackerClient,
    history_depth: Option<String>,
}

impl IssuePaginator {
    pub fn new(client: TrackerClient) -> Self {
        Self {
            client,
            history_depth: None,
        }
    }

    /// 初回取得の履歴深さ（例：`7d`）を設定
    pub fn history_depth(mut self, depth: Option<String>) -> Self {
        self.history_depth = depth.filter(|d| !d.trim().is_empty());
        self
    }

    /// フィルタに一致する課題をすべて取得
    ///
    /// 合計件数は最初のレスポンスの `X-Total-Count` で確定し、以降は直近の
    /// レスポンスのカーソルで続きを取得する。続きのページが空のまま合計に
    /// 届かない場合はプロトコルエラーで終了する。
    pub async fn fetch_all(&self, filter: &str, cancel: &CancellationToken) -> Result<Vec<Issue>> {
        let query = apply_history_depth(filter, self.history_depth.as_deref());
        if query != filter {
            info!(
                original_query = filter,
                query = %query,
                history_depth = self.history_depth.as_deref().unwrap_or_default(),
                "Modified query with history depth"
            );
        }
        info!(query = %query, "Starting getting issues");

        let first = self.request_page(&query, None, cancel).await?;
        let total_count = parse_total_count(first.total_count.as_deref())?;

        let mut issues = Vec::with_capacity(total_count);
        let mut last_page = first;
        issues.append(&mut last_page.issues);
        info!(
            issues_count = issues.len(),
            total_count, "Initial response received"
        );

        while issues.len() < total_count {
            let cursor = last_page.cursor().ok_or_else(|| {
                Error::Protocol(format!(
                    "missing {} or {} header with {} of {} issues fetched",
                    SCROLL_ID_HEADER,
                    SCROLL_TOKEN_HEADER,
                    issues.len(),
                    total_count
                ))
            })?;

            let mut page = self.request_page(&query, Some(&cursor), cancel).await?;
            if page.issues.is_empty() {
                return Err(Error::Protocol(format!(
                    "scroll returned no issues with {} of {} fetched",
                    issues.len(),
                    total_count
                )));
            }

            issues.append(&mut page.issues);
            debug!(
                current_count = issues.len(),
                total_count, "Scroll response received"
            );
            last_page = page;
        }

        info!(total_issues = issues.len(), query = %query, "Successfully retrieved all issues");
        Ok(issues)
    }

    async fn request_page(
        &self,
        query: &str,
        cursor: Option<&ScrollCursor>,
        cancel: &CancellationToken,
    ) -> Result<SearchPage> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match cursor {
            None => cancellable(cancel, self.client.search_first_page(query)).await,
            Some(cursor) => cancellable(cancel, self.client.search_next_page(query, cursor)).await,
        }
    }
}
