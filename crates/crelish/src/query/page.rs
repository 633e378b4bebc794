use serde::Serialize;

/// One page of a collection plus the numbers needed to render a pager.
///
/// `page` is 1-based. A page past the end has no items but still reports the
/// real `total_count`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub page_size: usize,
    pub page: usize,
}

impl<T> Page<T> {
    /// Cut page `page` out of an already filtered and sorted collection.
    pub fn slice(all: Vec<T>, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let total_count = all.len();
        let items = if page_size == 0 {
            all
        } else {
            all.into_iter()
                .skip((page - 1).saturating_mul(page_size))
                .take(page_size)
                .collect()
        };
        Self {
            items,
            total_count,
            page_size,
            page,
        }
    }

    /// Zero page size means "everything on one page".
    pub fn page_count(&self) -> usize {
        if self.page_size == 0 {
            return usize::from(self.total_count > 0);
        }
        self.total_count.div_ceil(self.page_size)
    }

    pub fn is_last(&self) -> bool {
        self.page >= self.page_count()
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page_size: self.page_size,
            page: self.page,
        }
    }
}
