//! Mock implementations for testing
//!
//! These mocks enable end-to-end dispatcher tests without real I/O.

use super::traits::*;
use crate::db::{
    Broadcast, Callback, Database, Request, RequestFilter, RequestId, RequestStatus, Role, User,
    UserId,
};
use crate::max::DeliveryError;
use crate::replies::OutgoingMessage;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// ============================================================================
// In-memory directory
// ============================================================================

/// Directory backed by an in-memory SQLite database, with switches for
/// injecting collaborator failures
pub struct InMemoryDirectory {
    db: DatabaseDirectory,
    raw: Database,
    unavailable: AtomicBool,
    fail_audit: AtomicBool,
}

#[allow(dead_code)]
impl InMemoryDirectory {
    pub fn new() -> Self {
        let raw = Database::open_in_memory().unwrap();
        Self {
            db: DatabaseDirectory::new(raw.clone()),
            raw,
            unavailable: AtomicBool::new(false),
            fail_audit: AtomicBool::new(false),
        }
    }

    pub fn add_user(&self, user_id: UserId, name: &str) -> User {
        self.raw.ensure_user(user_id, name).unwrap()
    }

    pub fn add_staff(&self, user_id: UserId, role: Role) -> User {
        self.raw.ensure_user(user_id, "staff").unwrap();
        self.raw.set_user_role(user_id, role).unwrap()
    }

    /// Make every call fail as if storage were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only the broadcast audit write fail
    pub fn fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    pub fn user(&self, user_id: UserId) -> Option<User> {
        self.raw.get_user(user_id).unwrap()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.raw.list_requests_filtered(RequestFilter::All).unwrap()
    }

    pub fn request(&self, id: RequestId) -> Request {
        self.raw.get_request(id).unwrap().unwrap()
    }

    pub fn callbacks(&self) -> Vec<Callback> {
        self.raw.list_callbacks().unwrap()
    }

    pub fn broadcasts(&self) -> Vec<Broadcast> {
        self.raw.list_broadcasts().unwrap()
    }

    fn check(&self) -> Result<(), BridgeError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(BridgeError::unavailable("storage offline"))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn ensure_user(&self, user_id: UserId, name: &str) -> Result<User, BridgeError> {
        self.check()?;
        self.db.ensure_user(user_id, name).await
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, BridgeError> {
        self.check()?;
        self.db.get_user(user_id).await
    }

    async fn set_user_role(&self, user_id: UserId, role: Role) -> Result<User, BridgeError> {
        self.check()?;
        self.db.set_user_role(user_id, role).await
    }

    async fn list_users(&self) -> Result<Vec<User>, BridgeError> {
        self.check()?;
        self.db.list_users().await
    }

    async fn create_request(
        &self,
        user_id: UserId,
        request_type: &str,
        body: &str,
    ) -> Result<Request, BridgeError> {
        self.check()?;
        self.db.create_request(user_id, request_type, body).await
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<Request>, BridgeError> {
        self.check()?;
        self.db.get_request(id).await
    }

    async fn update_request_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        comment: Option<&str>,
        actor: UserId,
    ) -> Result<Request, BridgeError> {
        self.check()?;
        self.db.update_request_status(id, status, comment, actor).await
    }

    async fn list_requests_filtered(
        &self,
        filter: RequestFilter,
    ) -> Result<Vec<Request>, BridgeError> {
        self.check()?;
        self.db.list_requests_filtered(filter).await
    }

    async fn list_user_requests(&self, user_id: UserId) -> Result<Vec<Request>, BridgeError> {
        self.check()?;
        self.db.list_user_requests(user_id).await
    }

    async fn create_callback(
        &self,
        user_id: UserId,
        phone: &str,
        note: &str,
    ) -> Result<Callback, BridgeError> {
        self.check()?;
        self.db.create_callback(user_id, phone, note).await
    }

    async fn list_callbacks(&self) -> Result<Vec<Callback>, BridgeError> {
        self.check()?;
        self.db.list_callbacks().await
    }

    async fn create_broadcast(
        &self,
        admin_id: UserId,
        text: &str,
    ) -> Result<Broadcast, BridgeError> {
        self.check()?;
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(BridgeError::unavailable("audit log offline"));
        }
        self.db.create_broadcast(admin_id, text).await
    }
}

// ============================================================================
// Mock transport
// ============================================================================

/// Transport that records deliveries and fails for selected users
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(UserId, OutgoingMessage)>>,
    answered: Mutex<Vec<String>>,
    failing: Mutex<HashSet<UserId>>,
    stalled: Mutex<HashSet<UserId>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, user_id: UserId) {
        self.failing.lock().unwrap().insert(user_id);
    }

    /// Deliveries to this user never complete
    pub fn stall_for(&self, user_id: UserId) {
        self.stalled.lock().unwrap().insert(user_id);
    }

    pub fn messages_for(&self, user_id: UserId) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| *to == user_id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Text of the last message delivered to a user
    pub fn last_text(&self, user_id: UserId) -> Option<String> {
        self.messages_for(user_id).last().map(|m| m.text.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_message(
        &self,
        user_id: UserId,
        message: &OutgoingMessage,
    ) -> Result<(), DeliveryError> {
        let stalled = self.stalled.lock().unwrap().contains(&user_id);
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().unwrap().contains(&user_id) {
            return Err(DeliveryError::invalid_request("chat.denied: user blocked the bot"));
        }
        self.sent.lock().unwrap().push((user_id, message.clone()));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), DeliveryError> {
        self.answered.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }
}

// ============================================================================
// End-to-end dispatcher tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{DispatchSettings, Dispatcher, RuntimeManager, WORKER_QUEUE};
    use crate::state_machine::{Attachment, ConvState, Event, Inbound};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const OWNER: UserId = 1;
    const STUDENT: UserId = 100;

    struct TestBot {
        dispatcher: Dispatcher<InMemoryDirectory, MockTransport>,
        directory: Arc<InMemoryDirectory>,
        transport: Arc<MockTransport>,
    }

    impl TestBot {
        fn new() -> Self {
            let directory = Arc::new(InMemoryDirectory::new());
            let transport = Arc::new(MockTransport::new());
            let settings = DispatchSettings {
                owner_id: Some(OWNER),
                ..DispatchSettings::default()
            };
            Self {
                dispatcher: Dispatcher::new(directory.clone(), transport.clone(), settings),
                directory,
                transport,
            }
        }

        async fn text(&self, user_id: UserId, text: &str) {
            self.dispatcher
                .handle(Inbound::new(user_id, Event::text(text)))
                .await;
        }

        async fn press(&self, user_id: UserId, payload: &str) {
            let mut inbound = Inbound::new(user_id, Event::button(payload));
            inbound.callback_id = Some(format!("cb-{payload}"));
            self.dispatcher.handle(inbound).await;
        }

        fn state(&self, user_id: UserId) -> ConvState {
            self.dispatcher.sessions().get(user_id)
        }

        fn last(&self, user_id: UserId) -> String {
            self.transport.last_text(user_id).unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_shorthand_request_round_trip() {
        let bot = TestBot::new();

        bot.text(STUDENT, "справка: нужна справка").await;

        let requests = bot.directory.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request_type, "справка");
        assert_eq!(requests[0].body, "нужна справка");
        assert_eq!(requests[0].user_id, STUDENT);
        assert!(bot.last(STUDENT).contains(&requests[0].id.to_string()));
        assert!(bot.directory.user(STUDENT).is_some());
    }

    #[tokio::test]
    async fn test_request_flow_via_menu() {
        let bot = TestBot::new();

        bot.press(STUDENT, "req_menu").await;
        bot.press(STUDENT, "req_type:заявление").await;
        assert!(matches!(bot.state(STUDENT), ConvState::AwaitingRequestBody { .. }));

        bot.text(STUDENT, "прошу академический отпуск").await;

        assert_eq!(bot.state(STUDENT), ConvState::Idle);
        let requests = bot.directory.requests();
        assert_eq!(requests[0].request_type, "заявление");
        assert_eq!(
            bot.transport.answered(),
            vec!["cb-req_menu".to_string(), "cb-req_type:заявление".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cancel_leaves_no_request() {
        let bot = TestBot::new();

        bot.press(STUDENT, "req_type:справка").await;
        bot.text(STUDENT, "ОТМЕНА").await;

        assert_eq!(bot.state(STUDENT), ConvState::Idle);
        assert!(bot.directory.requests().is_empty());
        assert!(bot.last(STUDENT).contains("отменено"));
    }

    #[tokio::test]
    async fn test_phone_creates_callback() {
        let bot = TestBot::new();

        bot.text(STUDENT, "+79991234567").await;

        let callbacks = bot.directory.callbacks();
        assert_eq!(callbacks.len(), 1);
        assert_eq!(callbacks[0].phone, "+79991234567");
        assert_eq!(callbacks[0].status, "waiting");
    }

    #[tokio::test]
    async fn test_unrecognized_text() {
        let bot = TestBot::new();
        bot.text(STUDENT, "привет").await;
        assert_eq!(bot.last(STUDENT), "Не понял. Напишите /start");
    }

    #[tokio::test]
    async fn test_event_without_sender_is_dropped() {
        let bot = TestBot::new();
        let mut inbound = Inbound::new(STUDENT, Event::text("/start"));
        inbound.user_id = None;

        bot.dispatcher.handle(inbound).await;

        assert_eq!(bot.transport.sent_count(), 0);
        assert!(bot.directory.user(STUDENT).is_none());
    }

    #[tokio::test]
    async fn test_role_command_permissions() {
        let bot = TestBot::new();
        bot.directory.add_user(123, "Кандидат");

        bot.text(STUDENT, "/role 123 dekanat").await;
        assert_eq!(bot.last(STUDENT), "❌ Недостаточно прав.");
        assert_eq!(bot.directory.user(123).unwrap().role, Role::User);

        // Unknown target: not found, nothing created
        bot.text(OWNER, "/role 999 dekanat").await;
        assert!(bot.last(OWNER).contains("не найден"));
        assert!(bot.directory.user(999).is_none());

        bot.text(OWNER, "/role 123 dekanat").await;
        assert_eq!(bot.directory.user(123).unwrap().role, Role::Dekanat);
        assert!(bot.last(123).contains("dekanat"));
    }

    #[tokio::test]
    async fn test_role_change_applies_to_next_event() {
        let bot = TestBot::new();
        bot.directory.add_user(200, "Сотрудник");

        bot.press(200, "staff_callbacks").await;
        assert_eq!(bot.last(200), "❌ Недостаточно прав.");

        bot.text(OWNER, "/role 200 dekanat").await;
        bot.press(200, "staff_callbacks").await;
        assert!(bot.last(200).contains("перезвон"));
    }

    #[tokio::test]
    async fn test_moderation_round_trip() {
        let bot = TestBot::new();
        bot.directory.add_staff(10, Role::Dekanat);
        bot.text(STUDENT, "вопрос: когда сессия?").await;
        let id = bot.directory.requests()[0].id;

        bot.press(10, &format!("mod:progress:{id}:all")).await;
        assert_eq!(bot.directory.request(id).status, RequestStatus::InProgress);
        assert_eq!(bot.directory.request(id).assigned_admin, Some(10));
        assert!(bot.last(STUDENT).contains("в работе"));

        bot.press(10, &format!("mod:reject:{id}:in_progress")).await;
        assert!(matches!(
            bot.state(10),
            ConvState::RejectingRequest { request_id, .. } if request_id == id
        ));

        bot.text(10, "сессия по расписанию").await;
        let request = bot.directory.request(id);
        assert_eq!(request.status, RequestStatus::Rejected);
        assert_eq!(request.comment.as_deref(), Some("сессия по расписанию"));
        assert_eq!(bot.state(10), ConvState::Idle);
        assert!(bot.last(STUDENT).contains("сессия по расписанию"));
    }

    #[tokio::test]
    async fn test_reject_cancel_keeps_request_open() {
        let bot = TestBot::new();
        bot.directory.add_staff(10, Role::Admin);
        bot.text(STUDENT, "справка: в военкомат").await;
        let id = bot.directory.requests()[0].id;

        bot.press(10, &format!("mod:reject:{id}:new")).await;
        bot.text(10, "отмена").await;

        assert_eq!(bot.state(10), ConvState::Idle);
        assert_eq!(bot.directory.request(id).status, RequestStatus::New);
    }

    #[tokio::test]
    async fn test_moderating_closed_or_missing_request() {
        let bot = TestBot::new();
        bot.directory.add_staff(10, Role::Dekanat);
        bot.text(STUDENT, "справка: нужна").await;
        let id = bot.directory.requests()[0].id;
        bot.press(10, &format!("mod:done:{id}:all")).await;

        bot.press(10, &format!("mod:reject:{id}:all")).await;
        assert!(bot.last(10).contains("уже закрыта"));
        assert_eq!(bot.state(10), ConvState::Idle);

        bot.press(10, "mod:progress:4242:all").await;
        assert!(bot.last(10).contains("не найдена"));
        assert_eq!(bot.directory.request(id).status, RequestStatus::Done);
    }

    #[tokio::test]
    async fn test_bridge_failure_keeps_state() {
        let bot = TestBot::new();
        bot.press(STUDENT, "req_type:справка").await;
        let before = bot.state(STUDENT);

        bot.directory.set_unavailable(true);
        bot.text(STUDENT, "нужна справка").await;

        assert_eq!(bot.state(STUDENT), before);
        assert!(bot.last(STUDENT).contains("Попробуйте ещё раз"));

        // Same input succeeds once storage is back
        bot.directory.set_unavailable(false);
        bot.text(STUDENT, "нужна справка").await;
        assert_eq!(bot.state(STUDENT), ConvState::Idle);
        assert_eq!(bot.directory.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_end_to_end() {
        let bot = TestBot::new();
        for id in [100, 101, 102] {
            bot.directory.add_user(id, "student");
        }
        bot.transport.fail_for(101);

        bot.press(OWNER, "staff_broadcast").await;
        bot.dispatcher
            .handle(Inbound::new(
                OWNER,
                Event::Message {
                    text: String::new(),
                    attachments: vec![Attachment {
                        kind: "image".to_string(),
                        payload: json!({"token": "img"}),
                        ..Default::default()
                    }],
                },
            ))
            .await;
        assert!(bot.last(OWNER).contains("Добавлено вложений: 1"));

        bot.text(OWNER, "Завтра пар нет").await;

        assert_eq!(bot.state(OWNER), ConvState::Idle);
        let delivered = bot.transport.messages_for(100);
        assert_eq!(delivered.last().unwrap().text, "Завтра пар нет");
        assert_eq!(delivered.last().unwrap().attachments.len(), 1);
        // Owner, 100 and 102 receive it; 101 is skipped
        assert_eq!(bot.last(OWNER), "Готово!\nОтправлено: 3\nПропущено: 1");
        assert_eq!(bot.directory.broadcasts().len(), 1);
    }

    #[tokio::test]
    async fn test_non_staff_cannot_broadcast() {
        let bot = TestBot::new();

        bot.press(STUDENT, "staff_broadcast").await;

        assert_eq!(bot.state(STUDENT), ConvState::Idle);
        assert_eq!(bot.last(STUDENT), "❌ Недостаточно прав.");
    }

    #[tokio::test]
    async fn test_runtime_manager_serializes_per_user() {
        let directory = Arc::new(InMemoryDirectory::new());
        let transport = Arc::new(MockTransport::new());
        let dispatcher = Dispatcher::new(
            directory.clone(),
            transport.clone(),
            DispatchSettings::default(),
        );
        let manager = RuntimeManager::new(dispatcher, Duration::from_millis(50));

        manager
            .submit(Inbound::new(STUDENT, Event::button("req_type:вопрос")))
            .await;
        manager
            .submit(Inbound::new(STUDENT, Event::text("первый")))
            .await;
        manager
            .submit(Inbound::new(STUDENT, Event::text("вопрос: второй")))
            .await;

        tokio::time::sleep(Duration::from_millis(300)).await;

        let bodies: Vec<_> = directory
            .requests()
            .into_iter()
            .rev()
            .map(|r| r.body)
            .collect();
        assert_eq!(bodies, vec!["первый".to_string(), "второй".to_string()]);
        // The idle worker has retired
        assert_eq!(manager.active_workers().await, 0);

        // A retired user is picked up by a fresh worker
        manager
            .submit(Inbound::new(STUDENT, Event::text("/start")))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(transport.last_text(STUDENT).unwrap().contains("Добро пожаловать"));
    }

    #[tokio::test]
    async fn test_stalled_user_does_not_block_others() {
        const STALLED: UserId = 7;
        let directory = Arc::new(InMemoryDirectory::new());
        let transport = Arc::new(MockTransport::new());
        transport.stall_for(STALLED);
        let dispatcher = Dispatcher::new(
            directory.clone(),
            transport.clone(),
            DispatchSettings::default(),
        );
        let manager = RuntimeManager::new(dispatcher, Duration::from_secs(30));

        // The first event hangs in delivery; the rest fill the queue
        let mut queued = 0;
        for _ in 0..WORKER_QUEUE + 8 {
            if manager
                .submit(Inbound::new(STALLED, Event::text("/help")))
                .await
            {
                queued += 1;
            }
            tokio::task::yield_now().await;
        }
        assert!(queued <= WORKER_QUEUE + 1, "queued {queued}");
        assert!(queued < WORKER_QUEUE + 8);

        let accepted = tokio::time::timeout(
            Duration::from_secs(2),
            manager.submit(Inbound::new(STUDENT, Event::text("/help"))),
        )
        .await
        .expect("submit for another user must not wait on the stalled one");
        assert!(accepted);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(transport.last_text(STUDENT).is_some());
        assert!(transport.messages_for(STALLED).is_empty());
        assert_eq!(manager.active_workers().await, 2);
    }
}
