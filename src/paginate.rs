use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::TransportClient;
use crate::config::{PaginationOptions, TaskOptions};
use crate::descriptor::RequestDescriptor;
use crate::error::{ApiError, ConfigError};
use crate::task::{RequestState, RequestTask, TaskPhase};
use crate::util::lock_unpoisoned;

/// A payload that carries one page of a list.
pub trait PagedPayload {
    /// Server-reported total across all pages, if present.
    fn total(&self) -> Option<u64>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The common `{ list, total }` page shape. `records` and `items` are accepted
/// as aliases for `list`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Page<I> {
    #[serde(alias = "records", alias = "items", default = "Vec::new")]
    pub list: Vec<I>,
    #[serde(default)]
    pub total: Option<u64>,
}

impl<I> PagedPayload for Page<I> {
    fn total(&self) -> Option<u64> {
        self.total
    }

    fn len(&self) -> usize {
        self.list.len()
    }
}

impl<I> PagedPayload for Vec<I> {
    fn total(&self) -> Option<u64> {
        None
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaginationState {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

impl PaginationState {
    pub fn has_more(&self) -> bool {
        u64::from(self.page).saturating_mul(u64::from(self.page_size)) < self.total
    }
}

/// Arguments of one page fetch.
#[derive(Clone, Debug, PartialEq)]
pub struct PageQuery {
    pub page: u32,
    pub page_size: u32,
    pub params: Map<String, Value>,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            params: Map::new(),
        }
    }
}

impl PageQuery {
    /// `params` with the page keys merged in; page keys win on conflict.
    pub fn merged(&self, page_param: &str, page_size_param: &str) -> Map<String, Value> {
        let mut merged = self.params.clone();
        merged.insert(page_param.to_owned(), Value::from(self.page));
        merged.insert(page_size_param.to_owned(), Value::from(self.page_size));
        merged
    }
}

struct Pager {
    options: PaginationOptions,
    state: PaginationState,
    params: Map<String, Value>,
}

impl Pager {
    fn query(&self) -> PageQuery {
        PageQuery {
            page: self.state.page,
            page_size: self.state.page_size,
            params: self.params.clone(),
        }
    }
}

/// A [`RequestTask`] over paged list endpoints.
///
/// The factory receives the merged query map (filters plus page keys) and
/// builds the descriptor; `total` follows the last successful page.
pub struct PaginatedRequestTask<T> {
    task: RequestTask<PageQuery, T>,
    pager: Arc<Mutex<Pager>>,
}

impl<T> Clone for PaginatedRequestTask<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            pager: Arc::clone(&self.pager),
        }
    }
}

impl<T> PaginatedRequestTask<T>
where
    T: PagedPayload + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new<F>(
        client: TransportClient,
        factory: F,
        task_options: TaskOptions<PageQuery, T>,
        options: PaginationOptions,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(Map<String, Value>) -> RequestDescriptor + Send + Sync + 'static,
    {
        let page_size = options.default_page_size.max(1);
        let pager = Arc::new(Mutex::new(Pager {
            state: PaginationState {
                page: 1,
                page_size,
                total: 0,
            },
            params: options.default_params.clone(),
            options,
        }));

        let initial_query = lock_unpoisoned(&pager).query();
        let user_on_success = task_options.on_success.clone();
        let hook_pager = Arc::clone(&pager);
        let task_options = task_options
            .with_default_args(initial_query)
            .with_on_success(move |data: &T, query: &PageQuery| {
                {
                    let mut pager = lock_unpoisoned(&hook_pager);
                    let fallback = pager
                        .options
                        .total_from_len
                        .then(|| data.len() as u64);
                    if let Some(total) = data.total().or(fallback) {
                        pager.state.total = total;
                    }
                }
                if let Some(on_success) = &user_on_success {
                    on_success(data, query);
                }
            });

        let factory_pager = Arc::clone(&pager);
        let task = RequestTask::new(
            client,
            move |query: &PageQuery| {
                let (page_param, page_size_param) = {
                    let pager = lock_unpoisoned(&factory_pager);
                    (
                        pager.options.page_param.clone(),
                        pager.options.page_size_param.clone(),
                    )
                };
                factory(query.merged(&page_param, &page_size_param))
            },
            task_options,
        )?;

        Ok(Self { task, pager })
    }

    pub fn change_page(&self, page: u32, page_size: u32) -> JoinHandle<Option<T>> {
        let query = {
            let mut pager = lock_unpoisoned(&self.pager);
            pager.state.page = page.max(1);
            pager.state.page_size = page_size.max(1);
            pager.query()
        };
        self.task.spawn_run(query)
    }

    /// Replaces the filters and jumps back to page 1. `total` is kept until
    /// the refetch succeeds.
    pub fn change_params(&self, params: Map<String, Value>) -> JoinHandle<Option<T>> {
        let query = {
            let mut pager = lock_unpoisoned(&self.pager);
            pager.params = params;
            pager.state.page = 1;
            pager.query()
        };
        self.task.spawn_run(query)
    }

    pub fn reset(&self) -> JoinHandle<Option<T>> {
        let query = {
            let mut pager = lock_unpoisoned(&self.pager);
            pager.params = pager.options.default_params.clone();
            pager.state = PaginationState {
                page: 1,
                page_size: pager.options.default_page_size.max(1),
                total: 0,
            };
            pager.query()
        };
        self.task.spawn_run(query)
    }

    pub async fn refresh(&self) -> Option<T> {
        let query = lock_unpoisoned(&self.pager).query();
        self.task.run(query).await
    }

    pub fn cancel(&self) {
        self.task.cancel();
    }

    pub fn pagination(&self) -> PaginationState {
        lock_unpoisoned(&self.pager).state
    }

    pub fn params(&self) -> Map<String, Value> {
        lock_unpoisoned(&self.pager).params.clone()
    }

    pub fn has_more(&self) -> bool {
        self.pagination().has_more()
    }

    pub fn state(&self) -> RequestState<T> {
        self.task.state()
    }

    pub fn data(&self) -> Option<T> {
        self.task.data()
    }

    pub fn error(&self) -> Option<ApiError> {
        self.task.error()
    }

    pub fn loading(&self) -> bool {
        self.task.loading()
    }

    pub fn phase(&self) -> TaskPhase {
        self.task.phase()
    }

    pub fn subscribe(&self) -> watch::Receiver<RequestState<T>> {
        self.task.subscribe()
    }

    pub fn task(&self) -> &RequestTask<PageQuery, T> {
        &self.task
    }
}
