//! 分页

use serde::Serialize;

use crate::error::{IvfError, Result};

/// 默认每页条数
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// 分页请求，页码从 1 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, page_size: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.page_size as usize
    }

    pub fn limit(&self) -> usize {
        self.page_size as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, DEFAULT_PAGE_SIZE)
    }
}

/// 一页结果及总数
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_objects: u64,
}

impl<T> Page<T> {
    /// 从已排序的完整结果集截取一页
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let total_objects = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset())
            .take(request.limit())
            .collect();

        Self {
            items,
            page: request.page,
            page_size: request.page_size,
            total_objects,
        }
    }

    /// 总页数，空结果也算一页
    pub fn total_pages(&self) -> u32 {
        let pages = self.total_objects.div_ceil(u64::from(self.page_size.max(1)));
        pages.max(1) as u32
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    /// 页码超出范围时返回 NotFound
    pub fn ensure_in_range(self) -> Result<Self> {
        if self.page > self.total_pages() {
            return Err(IvfError::NotFound("Invalid page.".to_string()));
        }
        Ok(self)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total_objects: self.total_objects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_counts() {
        let page = Page::from_sorted((1..=23).collect::<Vec<_>>(), PageRequest::new(Some(3), 10));
        assert_eq!(page.items, vec![21, 22, 23]);
        assert_eq!(page.total_objects, 23);
        assert_eq!(page.total_pages(), 3);
        assert!(!page.has_next());
        assert!(page.has_previous());
    }

    #[test]
    fn test_empty_first_page_is_valid() {
        let page = Page::<u8>::from_sorted(Vec::new(), PageRequest::default());
        assert_eq!(page.total_pages(), 1);
        assert!(page.ensure_in_range().is_ok());
    }

    #[test]
    fn test_page_past_end_is_not_found() {
        let page = Page::from_sorted(vec![1, 2], PageRequest::new(Some(2), 10));
        assert!(matches!(page.ensure_in_range(), Err(IvfError::NotFound(_))));
    }
}
