//! Shared fixtures: fake data providers, a recording message sink and a wired pipeline
//! over a temporary workspace.

#![allow(dead_code)]

use async_trait::async_trait;
use dataprivacy::config::DataPrivacyConfig;
use dataprivacy::context::{Context, ContextLevel, ContextTree};
use dataprivacy::pipeline::Pipeline;
use dataprivacy::privacy::{
    ApprovedContextList, ApprovedUserList, ComponentWriter, ContextDiscovery, ContextList,
    DataProvider, MetadataCollection, UserDataEraser, UserDataExporter, UserList,
    UserListProvider,
};
use dataprivacy::request::Message;
use dataprivacy::request::MessageSink;
use dataprivacy::types::{ContextId, RequestId, UserId};
use dataprivacy::users::{MemoryDirectory, UserRecord};
use dataprivacy::RequestType;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const SYSTEM: ContextId = ContextId(1);
pub const COURSE: ContextId = ContextId(10);
pub const FORUM: ContextId = ContextId(11);
pub const ARCHIVED_COURSE: ContextId = ContextId(12);
pub const ALICE_CONTEXT: ContextId = ContextId(20);
pub const BOB_CONTEXT: ContextId = ContextId(30);
pub const DANA_CONTEXT: ContextId = ContextId(90);

pub const ALICE: UserId = UserId(2);
pub const BOB: UserId = UserId(3);
pub const MALLORY: UserId = UserId(4);
pub const DANA: UserId = UserId(9);

pub const SECRET: &str = "integration-secret-0123456789";

/// A component holding per-user data in a set of contexts.
pub struct FakeProvider {
    component: String,
    data: Mutex<BTreeMap<UserId, BTreeSet<ContextId>>>,
    pub exported: Mutex<Vec<ContextId>>,
    pub deleted: Mutex<Vec<(UserId, Vec<ContextId>)>>,
    pub export_calls: AtomicUsize,
    pub fail_export: AtomicBool,
    /// Export into a context outside the approved list
    pub stray_write: Mutex<Option<ContextId>>,
}

impl FakeProvider {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            data: Mutex::new(BTreeMap::new()),
            exported: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            export_calls: AtomicUsize::new(0),
            fail_export: AtomicBool::new(false),
            stray_write: Mutex::new(None),
        }
    }

    pub fn holding(self, user: UserId, contexts: &[ContextId]) -> Self {
        self.data
            .lock()
            .entry(user)
            .or_default()
            .extend(contexts.iter().copied());
        self
    }

    pub fn forget(&self, user: UserId, context: ContextId) {
        if let Some(held) = self.data.lock().get_mut(&user) {
            held.remove(&context);
        }
    }

    pub fn held(&self, user: UserId) -> Vec<ContextId> {
        self.data
            .lock()
            .get(&user)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl DataProvider for FakeProvider {
    fn component(&self) -> &str {
        &self.component
    }

    fn describe(&self, collection: &mut MetadataCollection) {
        collection.add_database_table(
            &format!("{}_posts", self.component),
            [("userid", "Author"), ("message", "Post body")],
            "Posts written by the user",
        );
    }

    fn context_discovery(&self) -> Option<&dyn ContextDiscovery> {
        Some(self)
    }

    fn exporter(&self) -> Option<&dyn UserDataExporter> {
        Some(self)
    }

    fn eraser(&self) -> Option<&dyn UserDataEraser> {
        Some(self)
    }

    fn user_lister(&self) -> Option<&dyn UserListProvider> {
        Some(self)
    }
}

#[async_trait]
impl ContextDiscovery for FakeProvider {
    async fn get_contexts_for_user(&self, user: UserId) -> anyhow::Result<ContextList> {
        Ok(ContextList::from_ids(self.held(user)))
    }
}

#[async_trait]
impl UserDataExporter for FakeProvider {
    async fn export_user_data(
        &self,
        contexts: &ApprovedContextList,
        writer: &ComponentWriter<'_>,
    ) -> anyhow::Result<()> {
        self.export_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_export.load(Ordering::SeqCst) {
            anyhow::bail!("{} storage unavailable", self.component);
        }
        if let Some(stray) = *self.stray_write.lock() {
            writer.export_data(stray, &[], &json!({ "stray": true }))?;
        }
        for context in contexts.iter() {
            writer.export_data(
                context,
                &[],
                &json!({ "component": self.component, "context": context.as_u64() }),
            )?;
            writer.export_metadata(context, "preference", "on", "A stored preference")?;
            self.exported.lock().push(context);
        }
        Ok(())
    }
}

#[async_trait]
impl UserDataEraser for FakeProvider {
    async fn delete_data_for_user(&self, contexts: &ApprovedContextList) -> anyhow::Result<()> {
        let mut data = self.data.lock();
        if let Some(held) = data.get_mut(&contexts.user()) {
            for context in contexts.iter() {
                held.remove(&context);
            }
        }
        self.deleted
            .lock()
            .push((contexts.user(), contexts.context_ids().to_vec()));
        Ok(())
    }

    async fn delete_data_for_all_users_in_context(&self, context: &Context) -> anyhow::Result<()> {
        for held in self.data.lock().values_mut() {
            held.remove(&context.id);
        }
        Ok(())
    }
}

#[async_trait]
impl UserListProvider for FakeProvider {
    async fn get_users_in_context(&self, userlist: &mut UserList) -> anyhow::Result<()> {
        let users: Vec<UserId> = self
            .data
            .lock()
            .iter()
            .filter(|(_, held)| held.contains(&userlist.context()))
            .map(|(user, _)| *user)
            .collect();
        userlist.add_users(users);
        Ok(())
    }

    async fn delete_data_for_users(&self, users: &ApprovedUserList) -> anyhow::Result<()> {
        let mut data = self.data.lock();
        for user in users.user_ids() {
            if let Some(held) = data.get_mut(user) {
                held.remove(&users.context());
            }
        }
        Ok(())
    }
}

/// A component that only declares metadata.
pub struct MetadataOnly;

impl DataProvider for MetadataOnly {
    fn component(&self) -> &str {
        "core_cache"
    }

    fn describe(&self, collection: &mut MetadataCollection) {
        collection.link_subsystem("core_files", "Cached file previews");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    InApp(Message),
    Email { address: String, message: Message },
}

impl Sent {
    pub fn message(&self) -> &Message {
        match self {
            Sent::InApp(message) => message,
            Sent::Email { message, .. } => message,
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Sent>>,
    pub fail_in_app: AtomicBool,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn named(&self, name: &str) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| s.message().name == name)
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send_in_app(&self, message: &Message) -> anyhow::Result<()> {
        if self.fail_in_app.load(Ordering::SeqCst) {
            anyhow::bail!("message bus offline");
        }
        self.sent.lock().push(Sent::InApp(message.clone()));
        Ok(())
    }

    async fn send_email(&self, recipient: &UserRecord, message: &Message) -> anyhow::Result<()> {
        self.sent.lock().push(Sent::Email {
            address: recipient.email.clone(),
            message: message.clone(),
        });
        Ok(())
    }
}

pub fn context_tree() -> ContextTree {
    ContextTree::new()
        .with(Context::system(SYSTEM))
        .with(Context::new(COURSE, ContextLevel::Course, 100, Some(SYSTEM), "Biology 101"))
        .with(Context::new(FORUM, ContextLevel::Module, 7, Some(COURSE), "Course forum"))
        .with(
            Context::new(ARCHIVED_COURSE, ContextLevel::Course, 101, Some(SYSTEM), "Records 2019")
                .protected(),
        )
        .with(Context::user(ALICE_CONTEXT, ALICE, SYSTEM))
        .with(Context::user(BOB_CONTEXT, BOB, SYSTEM))
        .with(Context::user(DANA_CONTEXT, DANA, SYSTEM))
}

pub fn directory() -> MemoryDirectory {
    let directory = MemoryDirectory::new();
    directory.add_user(UserRecord::new(ALICE, "alice", "Alice Example", "alice@example.org"));
    directory.add_user(UserRecord::new(BOB, "bob", "Bob Parent", "bob@example.org"));
    directory.add_user(UserRecord::new(MALLORY, "mallory", "Mallory", "mallory@example.org"));
    directory.add_user(UserRecord::new(DANA, "dana", "Dana Officer", "dpo@example.org"));
    directory.grant_dpo(DANA);
    directory.delegate(BOB, ALICE);
    directory
}

pub fn test_config(temp: &TempDir) -> DataPrivacyConfig {
    let mut config = DataPrivacyConfig::default();
    config.storage.store_path = temp.path().join("store");
    config.storage.archive_path = temp.path().join("archives");
    config.export.download_base_url = "https://lms.example/pluginfile.php/".to_string();
    config.export.signing_secret = Some(SECRET.to_string());
    config.notifications.site_name = "Example Campus".to_string();
    config.queue.poll_interval_ms = 10;
    config.queue.retry_delay_ms = 0;
    config
}

pub struct Fixture {
    pub temp: TempDir,
    pub pipeline: Pipeline,
    pub users: Arc<MemoryDirectory>,
    pub contexts: Arc<ContextTree>,
    pub sink: Arc<RecordingSink>,
    pub forum: Arc<FakeProvider>,
    pub grades: Arc<FakeProvider>,
}

pub struct FixtureOptions {
    pub deactivate: bool,
    pub configure: fn(&mut DataPrivacyConfig),
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            deactivate: true,
            configure: |_| {},
        }
    }
}

pub fn fixture() -> Fixture {
    fixture_with(FixtureOptions::default())
}

pub fn fixture_with(options: FixtureOptions) -> Fixture {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp);
    (options.configure)(&mut config);
    config.processing.deactivate_subject_on_delete = options.deactivate;

    let users = Arc::new(directory());
    let contexts = Arc::new(context_tree());
    let sink = Arc::new(RecordingSink::default());
    let forum = Arc::new(FakeProvider::new("mod_forum").holding(ALICE, &[FORUM, ALICE_CONTEXT]));
    let grades = Arc::new(
        FakeProvider::new("core_grades")
            .holding(ALICE, &[COURSE, ARCHIVED_COURSE])
            .holding(BOB, &[COURSE]),
    );

    let pipeline = build_pipeline(
        config,
        &temp,
        &users,
        &contexts,
        &sink,
        &forum,
        &grades,
    );

    Fixture {
        temp,
        pipeline,
        users,
        contexts,
        sink,
        forum,
        grades,
    }
}

fn build_pipeline(
    config: DataPrivacyConfig,
    temp: &TempDir,
    users: &Arc<MemoryDirectory>,
    contexts: &Arc<ContextTree>,
    sink: &Arc<RecordingSink>,
    forum: &Arc<FakeProvider>,
    grades: &Arc<FakeProvider>,
) -> Pipeline {
    Pipeline::builder(config, temp.path())
        .register(forum.clone())
        .unwrap()
        .register(grades.clone())
        .unwrap()
        .register(Arc::new(MetadataOnly))
        .unwrap()
        .contexts(contexts.clone())
        .users(users.clone())
        .authority(users.clone())
        .deactivator(users.clone())
        .sink(sink.clone())
        .build()
        .unwrap()
}

impl Fixture {
    /// Close the stores and build a fresh pipeline over the same workspace.
    pub fn reopen(self) -> Fixture {
        let Fixture {
            temp,
            pipeline,
            users,
            contexts,
            sink,
            forum,
            grades,
        } = self;
        let config = pipeline.config().clone();
        pipeline.stores().requests.flush().unwrap();
        pipeline.stores().queue.flush().unwrap();
        drop(pipeline);
        let pipeline = build_pipeline(config, &temp, &users, &contexts, &sink, &forum, &grades);
        Fixture {
            temp,
            pipeline,
            users,
            contexts,
            sink,
            forum,
            grades,
        }
    }

    /// Drain the queue with a single inline worker.
    pub async fn drain(&self) -> dataprivacy::queue::RunSummary {
        self.pipeline.runner().run_until_idle("test-worker").await.unwrap()
    }

    /// File a request as the subject, run preprocessing and approve it as the DPO.
    pub async fn approved(&self, request_type: RequestType) -> RequestId {
        let service = self.pipeline.service();
        let request = service
            .create_data_request(ALICE, ALICE, request_type, "please")
            .unwrap();
        self.drain().await;
        service.approve_data_request(DANA, request.id).unwrap();
        request.id
    }
}
