//! Events published by the template around its operations

use rowmap_core::{KeySet, Mutation, Statement};

#[derive(Debug)]
pub enum TemplateEvent<'a> {
    BeforeSave { table: &'a str, mutations: &'a [Mutation] },
    AfterSave { table: &'a str, mutations: &'a [Mutation] },
    BeforeDelete { table: &'a str, mutations: &'a [Mutation] },
    AfterDelete { table: &'a str, mutations: &'a [Mutation] },
    AfterRead { table: &'a str, keys: &'a KeySet, rows: usize },
    AfterQuery { statement: &'a Statement, rows: usize },
    BeforeExecuteDml { statement: &'a Statement },
    AfterExecuteDml { statement: &'a Statement, rows_affected: u64 },
}

impl TemplateEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            TemplateEvent::BeforeSave { .. } => "before_save",
            TemplateEvent::AfterSave { .. } => "after_save",
            TemplateEvent::BeforeDelete { .. } => "before_delete",
            TemplateEvent::AfterDelete { .. } => "after_delete",
            TemplateEvent::AfterRead { .. } => "after_read",
            TemplateEvent::AfterQuery { .. } => "after_query",
            TemplateEvent::BeforeExecuteDml { .. } => "before_execute_dml",
            TemplateEvent::AfterExecuteDml { .. } => "after_execute_dml",
        }
    }
}

/// Observer registered on a template. "After" events fire only on success;
/// mutations inside a read/write transaction count as saved once buffered.
pub trait TemplateListener: Send + Sync {
    fn on_event(&self, event: &TemplateEvent<'_>);
}
