//! Scripted in-memory remote API and sub-steps for engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::action::{StepContext, StepError, StepOutcome, SubStep};
use crate::api::{Page, RemoteApi, RemoteError, WorkItem};

#[derive(Debug, Clone)]
pub struct FakeMutation {
    pub item_id: String,
    pub field: String,
    pub value: Value,
}

#[derive(Default)]
struct State {
    order: Vec<String>,
    items: HashMap<String, WorkItem>,
    pages: Option<Vec<(Vec<String>, Option<String>)>>,
    page_size: usize,
    list_errors: VecDeque<RemoteError>,
    fetch_errors: HashMap<String, VecDeque<RemoteError>>,
    mutation_errors: HashMap<String, VecDeque<RemoteError>>,
    panic_on_fetch: HashSet<String>,
    list_calls: usize,
    fetch_calls: usize,
    mutation_calls: usize,
    call_times: Vec<Instant>,
}

/// Remote double holding items `"1"..="n"` with an object payload.
pub struct FakeApi {
    state: Mutex<State>,
}

impl FakeApi {
    pub fn with_items(n: usize) -> Self {
        let mut state = State {
            page_size: 50,
            ..State::default()
        };
        for i in 1..=n {
            let id = i.to_string();
            state.order.push(id.clone());
            state.items.insert(id.clone(), item(&id));
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn page_size(self, n: usize) -> Self {
        self.state.lock().unwrap().page_size = n.max(1);
        self
    }

    /// Replace the listing with explicit pages of `(ids, next_cursor)`.
    pub fn set_pages(&self, pages: Vec<(Vec<&str>, Option<&str>)>) {
        let mut st = self.state.lock().unwrap();
        let mut explicit = Vec::new();
        for (ids, next) in pages {
            for id in &ids {
                st.items.entry(id.to_string()).or_insert_with(|| item(id));
            }
            explicit.push((
                ids.into_iter().map(String::from).collect(),
                next.map(String::from),
            ));
        }
        st.pages = Some(explicit);
    }

    /// Errors returned, in order, by the next listing calls.
    pub fn script_list(&self, errors: Vec<RemoteError>) {
        self.state.lock().unwrap().list_errors.extend(errors);
    }

    pub fn script_fetch(&self, item_id: &str, errors: Vec<RemoteError>) {
        self.state
            .lock()
            .unwrap()
            .fetch_errors
            .entry(item_id.to_string())
            .or_default()
            .extend(errors);
    }

    pub fn script_mutation(&self, item_id: &str, errors: Vec<RemoteError>) {
        self.state
            .lock()
            .unwrap()
            .mutation_errors
            .entry(item_id.to_string())
            .or_default()
            .extend(errors);
    }

    pub fn panic_on_fetch(&self, item_id: &str) {
        self.state
            .lock()
            .unwrap()
            .panic_on_fetch
            .insert(item_id.to_string());
    }

    /// Overwrite one field of the remote record.
    pub fn set_field(&self, item_id: &str, field: &str, value: Value) {
        let mut st = self.state.lock().unwrap();
        if let Some(item) = st.items.get_mut(item_id) {
            item.payload[field] = value;
        }
    }

    pub fn field(&self, item_id: &str, field: &str) -> Value {
        let st = self.state.lock().unwrap();
        st.items
            .get(item_id)
            .and_then(|i| i.payload.get(field).cloned())
            .unwrap_or(Value::Null)
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().unwrap().fetch_calls
    }

    /// Mutation attempts, failed ones included.
    pub fn mutation_calls(&self) -> usize {
        self.state.lock().unwrap().mutation_calls
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().call_times.len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().call_times.clone()
    }
}

fn item(id: &str) -> WorkItem {
    WorkItem::new(id, format!("Item {id}"), json!({ "title": format!("Item {id}") }))
}

#[async_trait]
impl RemoteApi for FakeApi {
    type Filter = ();
    type Mutation = FakeMutation;

    async fn list_page(&self, _filter: &(), cursor: Option<&str>) -> Result<Page, RemoteError> {
        let mut st = self.state.lock().unwrap();
        st.list_calls += 1;
        st.call_times.push(Instant::now());
        if let Some(err) = st.list_errors.pop_front() {
            return Err(err);
        }

        let (ids, next_cursor) = match &st.pages {
            Some(pages) => {
                let index = match cursor {
                    None => 0,
                    Some(c) => pages
                        .iter()
                        .position(|(_, next)| next.as_deref() == Some(c))
                        .map_or(pages.len(), |i| i + 1),
                };
                pages.get(index).cloned().unwrap_or_default()
            }
            None => {
                let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
                let end = (offset + st.page_size).min(st.order.len());
                let ids = st.order[offset.min(end)..end].to_vec();
                let next = (end < st.order.len()).then(|| end.to_string());
                (ids, next)
            }
        };
        let items = ids.iter().filter_map(|id| st.items.get(id).cloned()).collect();
        Ok(Page { items, next_cursor })
    }

    async fn fetch(&self, item_id: &str) -> Result<WorkItem, RemoteError> {
        let should_panic = {
            let mut st = self.state.lock().unwrap();
            st.fetch_calls += 1;
            st.call_times.push(Instant::now());
            st.panic_on_fetch.contains(item_id)
        };
        if should_panic {
            panic!("fake fetch exploded for {item_id}");
        }

        let mut st = self.state.lock().unwrap();
        if let Some(err) = st.fetch_errors.get_mut(item_id).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        st.items
            .get(item_id)
            .cloned()
            .ok_or_else(|| RemoteError::Permanent(format!("404 no item {item_id}")))
    }

    async fn perform_mutation(&self, m: &FakeMutation) -> Result<Value, RemoteError> {
        let mut st = self.state.lock().unwrap();
        st.mutation_calls += 1;
        st.call_times.push(Instant::now());
        if let Some(err) = st.mutation_errors.get_mut(&m.item_id).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        match st.items.get_mut(&m.item_id) {
            Some(item) => {
                item.payload[m.field.as_str()] = m.value.clone();
                Ok(json!({ "ok": true }))
            }
            None => Err(RemoteError::Permanent(format!("404 no item {}", m.item_id))),
        }
    }
}

// ---------------------------------------------------------------------------
// Sub-steps
// ---------------------------------------------------------------------------

/// Sets `field` to a constant. Skips the ids in `skip` as not applicable.
pub struct SetField {
    name: String,
    field: String,
    value: Value,
    skip: HashSet<String>,
}

impl SetField {
    pub fn new(field: &str, value: impl Into<Value>) -> Self {
        Self {
            name: format!("set-{field}"),
            field: field.to_string(),
            value: value.into(),
            skip: HashSet::new(),
        }
    }

    pub fn skip(mut self, item_id: &str) -> Self {
        self.skip.insert(item_id.to_string());
        self
    }
}

#[async_trait]
impl SubStep<FakeApi> for SetField {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self, item: &WorkItem, pinned: Option<&Value>) -> Result<Option<Value>, StepError> {
        if self.skip.contains(&item.id) {
            return Ok(None);
        }
        Ok(Some(pinned.cloned().unwrap_or_else(|| self.value.clone())))
    }

    async fn apply(
        &self,
        item: &WorkItem,
        target: &Value,
        cx: &mut StepContext<'_, FakeApi>,
    ) -> Result<StepOutcome, StepError> {
        write_field(item, &self.field, target, cx).await
    }
}

/// Adds one to a numeric field. The target depends on current state, so it
/// must be pinned to stay idempotent.
pub struct Increment {
    name: String,
    field: String,
}

impl Increment {
    pub fn new(field: &str) -> Self {
        Self {
            name: format!("incr-{field}"),
            field: field.to_string(),
        }
    }
}

#[async_trait]
impl SubStep<FakeApi> for Increment {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self, item: &WorkItem, pinned: Option<&Value>) -> Result<Option<Value>, StepError> {
        if let Some(pinned) = pinned {
            return Ok(Some(pinned.clone()));
        }
        let current = item.payload.get(&self.field).and_then(Value::as_i64).unwrap_or(0);
        Ok(Some(json!(current + 1)))
    }

    async fn apply(
        &self,
        item: &WorkItem,
        target: &Value,
        cx: &mut StepContext<'_, FakeApi>,
    ) -> Result<StepOutcome, StepError> {
        write_field(item, &self.field, target, cx).await
    }
}

async fn write_field(
    item: &WorkItem,
    field: &str,
    target: &Value,
    cx: &mut StepContext<'_, FakeApi>,
) -> Result<StepOutcome, StepError> {
    let current = cx.fetch(&item.id).await?;
    if current.payload.get(field) == Some(target) {
        return Ok(StepOutcome::AlreadySatisfied);
    }
    let detail = format!("{field} = {target}");
    if cx.dry_run() {
        return Ok(StepOutcome::WouldApply { detail });
    }
    let mutation = FakeMutation {
        item_id: item.id.clone(),
        field: field.to_string(),
        value: target.clone(),
    };
    cx.mutate("set_field", &mutation).await?;
    Ok(StepOutcome::Applied { detail })
}
