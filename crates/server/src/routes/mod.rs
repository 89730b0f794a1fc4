pub mod attachments;
pub mod auth;
pub mod chat;
pub mod collaborations;
pub mod comments;
pub mod dashboard;
pub mod discussions;
pub mod notifications;
pub mod projects;
pub mod replies;

#[cfg(test)]
pub mod test_support;

/// Page window for the paginated listings, built from optional `page` and
/// `per_page` query parameters.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    page: i64,
    per_page: i64,
}

impl Pagination {
    const DEFAULT_PER_PAGE: i64 = 12;
    const MAX_PER_PAGE: i64 = 50;
    const MAX_PAGE: i64 = 1_000_000;

    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1),
            per_page: per_page.unwrap_or(Self::DEFAULT_PER_PAGE),
        }
    }

    pub fn page(&self) -> i64 {
        self.page.clamp(1, Self::MAX_PAGE)
    }

    pub fn limit(&self) -> i64 {
        self.per_page.clamp(1, Self::MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.limit())
    }

    pub fn pages(&self, total: i64) -> i64 {
        (total + self.limit() - 1) / self.limit()
    }
}
