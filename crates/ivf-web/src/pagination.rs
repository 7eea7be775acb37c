//! 分页响应包装

use axum::http::Uri;
use ivf_core::{IvfError, Page, PageRequest};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// 解析 `page` 查询参数；无法解析的页码与越界页码一样返回 NotFound
pub fn page_request(state: &AppState, raw: Option<&str>) -> Result<PageRequest, ApiError> {
    let page = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => match raw.parse::<u32>() {
            Ok(page) if page > 0 => Some(page),
            _ => return Err(ApiError(IvfError::NotFound("Invalid page.".to_string()))),
        },
    };
    Ok(PageRequest::new(page, state.settings.page_size))
}

#[derive(Debug, Serialize)]
pub struct Links {
    pub next: Option<String>,
    pub previous: Option<String>,
}

/// 列表响应
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub links: Links,
    pub total_objects: u64,
    pub total_pages: u32,
    pub results: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn new(page: Page<T>, state: &AppState, uri: &Uri) -> Self {
        let link = |number: u32| state.absolute_url(&page_path(uri, number));

        Self {
            links: Links {
                next: page.has_next().then(|| link(page.page + 1)),
                previous: page.has_previous().then(|| link(page.page - 1)),
            },
            total_objects: page.total_objects,
            total_pages: page.total_pages(),
            results: page.items,
        }
    }
}

/// 列表项附带的详情链接
#[derive(Debug, Serialize)]
pub struct Linked<T> {
    #[serde(flatten)]
    pub item: T,
    pub relative_url: String,
    pub absolute_url: String,
}

impl<T> Linked<T> {
    pub fn new(item: T, relative_url: String, state: &AppState) -> Self {
        let absolute_url = state.absolute_url(&relative_url);
        Self {
            item,
            relative_url,
            absolute_url,
        }
    }
}

/// 保留原有查询参数，只替换页码
fn page_path(uri: &Uri, number: u32) -> String {
    let mut params: Vec<&str> = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty() && !pair.starts_with("page="))
        .collect();
    let page = format!("page={}", number);
    params.push(&page);

    format!("{}?{}", uri.path(), params.join("&"))
}
