//! Outgoing messages and reply rendering
//!
//! Every text the bot sends is built here. Keyboards are transport-neutral;
//! the MAX client turns them into inline-keyboard attachments.

use crate::db::{Callback, Request, RequestFilter, RequestId, RequestStatus, Role, User, UserId};
use crate::state_machine::{Action, Attachment, ModerationOp};
use serde::Serialize;
use std::fmt::Write;

/// Maximum number of entries rendered in a single listing
pub const LIST_LIMIT: usize = 20;

pub const UNRECOGNIZED: &str = "Не понял. Напишите /start";
pub const SHORTHAND_FORMAT: &str = "Формат:\nтип: текст\nНапример:\nсправка: нужна справка";

/// Inline-keyboard button
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Button {
    pub text: String,
    pub payload: String,
}

impl Button {
    pub fn new(text: impl Into<String>, action: &Action) -> Self {
        Self {
            text: text.into(),
            payload: action.to_string(),
        }
    }
}

/// Rows of buttons rendered under a message
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn row(mut self, row: Vec<Button>) -> Self {
        if !row.is_empty() {
            self.rows.push(row);
        }
        self
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }
}

/// A message addressed to one user
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub keyboard: Option<Keyboard>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: vec![],
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    fn with_text(mut self, text: String) -> Self {
        self.text = text;
        self
    }
}

fn back_to_menu() -> Vec<Button> {
    vec![Button::new("⬅️ В меню", &Action::MainMenu)]
}

fn status_label(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::New => "новая",
        RequestStatus::InProgress => "в работе",
        RequestStatus::Done => "выполнена",
        RequestStatus::Rejected => "отклонена",
    }
}

fn filter_label(filter: RequestFilter) -> &'static str {
    match filter {
        RequestFilter::All => "Все",
        RequestFilter::Status(RequestStatus::New) => "Новые",
        RequestFilter::Status(RequestStatus::InProgress) => "В работе",
        RequestFilter::Status(RequestStatus::Done) => "Выполненные",
        RequestFilter::Status(RequestStatus::Rejected) => "Отклонённые",
    }
}

// ============================================================================
// Menus and static texts
// ============================================================================

/// Main menu; staff and admin entries depend on the role
pub fn main_menu(role: Role) -> OutgoingMessage {
    menu_with_text("Добро пожаловать! Выберите действие:", role)
}

/// Main menu after a flow was aborted
pub fn cancelled(role: Role) -> OutgoingMessage {
    menu_with_text("Действие отменено. Выберите действие:", role)
}

fn menu_with_text(text: &str, role: Role) -> OutgoingMessage {
    let mut keyboard = Keyboard::default()
        .row(vec![
            Button::new("🧾 Подать заявку", &Action::RequestMenu),
            Button::new("📞 Перезвоните мне", &Action::CallbackMenu),
        ])
        .row(vec![
            Button::new("📋 Мои заявки", &Action::MyRequests),
            Button::new("❓ Помощь", &Action::Help),
        ]);

    if matches!(role, Role::Dekanat | Role::Admin) {
        keyboard = keyboard
            .row(vec![
                Button::new("📢 Рассылка", &Action::StaffBroadcast),
                Button::new("📂 Заявки", &Action::StaffRequests(RequestFilter::All)),
            ])
            .row(vec![Button::new("☎️ Перезвоны", &Action::StaffCallbacks)]);
    }
    if role == Role::Admin {
        keyboard = keyboard.row(vec![Button::new("⚙️ Управление ролями", &Action::AdminRoles)]);
    }

    OutgoingMessage::text(text).with_keyboard(keyboard)
}

pub fn help(role: Role) -> OutgoingMessage {
    let mut text = String::from(
        "Что умеет бот:\n\
         • подать заявку в деканат: кнопка «Подать заявку» или сообщение «тип: текст»\n\
         • заказать обратный звонок: отправьте номер телефона\n\
         • посмотреть свои заявки\n\n\
         Команды: /start, /menu, /help, /about, /cancel\n\
         Напишите «отмена», чтобы прервать текущее действие.",
    );
    if matches!(role, Role::Dekanat | Role::Admin) {
        text.push_str("\n\nДля сотрудников: рассылка, модерация заявок, список перезвонов.");
    }
    if role == Role::Admin {
        text.push_str("\nАдминистратору: /role <user_id> <user|dekanat|admin>");
    }
    OutgoingMessage::text(text).with_keyboard(Keyboard::default().row(back_to_menu()))
}

pub fn about() -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "«Деканат 24/7» v{}\nПриём заявок, обратные звонки и рассылки деканата.",
        env!("CARGO_PKG_VERSION")
    ))
}

// ============================================================================
// Request intake
// ============================================================================

pub fn request_type_menu(types: &[String]) -> OutgoingMessage {
    let keyboard = types.iter().fold(Keyboard::default(), |kb, label| {
        kb.row(vec![Button::new(
            label.as_str(),
            &Action::SelectType(label.clone()),
        )])
    });
    OutgoingMessage::text(format!(
        "Выберите тип заявки.\nМожно и без меню: напишите сообщение в формате\n\n{SHORTHAND_FORMAT}"
    ))
    .with_keyboard(keyboard.row(back_to_menu()))
}

pub fn request_body_prompt(request_type: &str) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "Тип заявки: {request_type}.\nОпишите её одним сообщением.\nДля отмены напишите «отмена»."
    ))
    .with_keyboard(Keyboard::default().row(vec![Button::new("✖️ Отмена", &Action::Cancel)]))
}

pub fn request_created(request: &Request) -> OutgoingMessage {
    OutgoingMessage::text(format!("Заявка принята! ID: {}", request.id))
        .with_keyboard(Keyboard::default().row(back_to_menu()))
}

pub fn own_requests(requests: &[Request]) -> OutgoingMessage {
    if requests.is_empty() {
        return OutgoingMessage::text("У вас пока нет заявок.")
            .with_keyboard(Keyboard::default().row(back_to_menu()));
    }

    let mut text = String::from("📋 Ваши заявки:\n\n");
    for r in requests.iter().take(LIST_LIMIT) {
        let _ = writeln!(text, "ID {} · {} · {}", r.id, r.request_type, status_label(r.status));
        if let Some(comment) = r.comment.as_deref().filter(|c| !c.is_empty()) {
            let _ = writeln!(text, "Комментарий: {comment}");
        }
    }
    push_footer(&mut text, requests.len());
    OutgoingMessage::text(text).with_keyboard(Keyboard::default().row(back_to_menu()))
}

// ============================================================================
// Callbacks
// ============================================================================

pub fn callback_prompt() -> OutgoingMessage {
    OutgoingMessage::text("Введите номер телефона, например +79991234567:")
        .with_keyboard(Keyboard::default().row(back_to_menu()))
}

pub fn callback_created(callback: &Callback) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "Заявка на перезвон принята! Вам перезвонят по номеру {}.",
        callback.phone
    ))
}

pub fn callback_list(callbacks: &[Callback]) -> OutgoingMessage {
    if callbacks.is_empty() {
        return OutgoingMessage::text("Нет заявок на перезвон.")
            .with_keyboard(Keyboard::default().row(back_to_menu()));
    }

    let mut text = String::from("☎️ Перезвоны:\n\n");
    for cb in callbacks.iter().take(LIST_LIMIT) {
        let _ = write!(
            text,
            "ID {}\nТелефон: {}\nОт: {}\nСтатус: {}\n",
            cb.id, cb.phone, cb.user_id, cb.status
        );
        if !cb.note.is_empty() {
            let _ = writeln!(text, "Примечание: {}", cb.note);
        }
        text.push('\n');
    }
    push_footer(&mut text, callbacks.len());
    OutgoingMessage::text(text.trim_end().to_string())
        .with_keyboard(Keyboard::default().row(back_to_menu()))
}

// ============================================================================
// Moderation
// ============================================================================

/// Staff listing of requests.
///
/// Non-terminal requests get per-request moderation buttons carrying the
/// current filter, so the same listing can be re-rendered afterwards.
pub fn request_list(requests: &[Request], filter: RequestFilter) -> OutgoingMessage {
    let filters = RequestFilter::ALL
        .iter()
        .map(|f| {
            let label = if *f == filter {
                format!("• {}", filter_label(*f))
            } else {
                filter_label(*f).to_string()
            };
            Button::new(label, &Action::StaffRequests(*f))
        })
        .collect::<Vec<_>>();
    let (first, second) = filters.split_at(3);
    let mut keyboard = Keyboard::default().row(first.to_vec()).row(second.to_vec());

    let mut text = format!("📂 Заявки ({}):\n\n", filter_label(filter));
    if requests.is_empty() {
        text.push_str("Заявок пока нет.");
    }

    for r in requests.iter().take(LIST_LIMIT) {
        let _ = write!(
            text,
            "ID {}\nТип: {}\nОт: {}\nСтатус: {}\n{}\n",
            r.id,
            r.request_type,
            r.user_id,
            status_label(r.status),
            r.body
        );
        if let Some(comment) = r.comment.as_deref().filter(|c| !c.is_empty()) {
            let _ = writeln!(text, "Комментарий: {comment}");
        }
        text.push('\n');

        if !r.status.is_terminal() {
            let moderate = |op| Action::Moderate {
                op,
                request_id: r.id,
                filter,
            };
            let mut row = Vec::with_capacity(3);
            if r.status != RequestStatus::InProgress {
                row.push(Button::new(
                    format!("▶️ #{} в работу", r.id),
                    &moderate(ModerationOp::Progress),
                ));
            }
            row.push(Button::new(format!("✅ #{}", r.id), &moderate(ModerationOp::Done)));
            row.push(Button::new(format!("⛔ #{}", r.id), &moderate(ModerationOp::Reject)));
            keyboard = keyboard.row(row);
        }
    }
    push_footer(&mut text, requests.len());

    OutgoingMessage::text(text.trim_end().to_string()).with_keyboard(keyboard.row(back_to_menu()))
}

pub fn reject_prompt(request_id: RequestId) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "Укажите причину отклонения заявки #{request_id}.\nДля отмены напишите «отмена»."
    ))
    .with_keyboard(Keyboard::default().row(vec![Button::new("✖️ Отмена", &Action::Cancel)]))
}

/// Notification sent to the owner of a request after a status change
pub fn status_notification(request: &Request) -> OutgoingMessage {
    let mut text = format!(
        "Статус вашей заявки #{} ({}) изменён: {}.",
        request.id,
        request.request_type,
        status_label(request.status)
    );
    if let Some(comment) = request.comment.as_deref().filter(|c| !c.is_empty()) {
        let _ = write!(text, "\nКомментарий: {comment}");
    }
    OutgoingMessage::text(text)
}

pub fn status_updated(request: &Request) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "Заявка #{} переведена в статус «{}».",
        request.id,
        status_label(request.status)
    ))
}

fn push_footer(text: &mut String, total: usize) {
    if total > LIST_LIMIT {
        let _ = write!(text, "\nПоказано {LIST_LIMIT} из {total}.");
    }
}

// ============================================================================
// Broadcast
// ============================================================================

pub fn broadcast_prompt() -> OutgoingMessage {
    OutgoingMessage::text(
        "Отправьте текст рассылки или вложения.\n\
         Когда отправите текст — начну рассылку.\n\
         Для отмены напишите «отмена».",
    )
    .with_keyboard(Keyboard::default().row(vec![Button::new("✖️ Отмена", &Action::Cancel)]))
}

pub fn attachments_added(total: usize) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "Добавлено вложений: {total}. Можете отправить текст — я начну рассылку."
    ))
}

pub fn broadcast_started() -> OutgoingMessage {
    OutgoingMessage::text("Начинаю рассылку…")
}

pub fn broadcast_report(sent: usize, skipped: usize, audit_recorded: bool) -> OutgoingMessage {
    let mut text = format!("Готово!\nОтправлено: {sent}\nПропущено: {skipped}");
    if !audit_recorded {
        text.push_str("\nВнимание: рассылка не записана в журнал.");
    }
    OutgoingMessage::text(text)
}

// ============================================================================
// Roles
// ============================================================================

pub fn roles_overview(users: &[User]) -> OutgoingMessage {
    let mut text = String::from("⚙️ Пользователи и роли:\n\n");
    for user in users.iter().take(LIST_LIMIT) {
        let name = if user.name.is_empty() { "без имени" } else { &user.name };
        let _ = writeln!(text, "{} · {} · {}", user.user_id, name, user.role);
    }
    push_footer(&mut text, users.len());
    text.push_str("\nКоманда:\n/role <user_id> <user|dekanat|admin>");
    OutgoingMessage::text(text).with_keyboard(Keyboard::default().row(back_to_menu()))
}

pub fn role_changed(target: UserId, role: Role) -> OutgoingMessage {
    OutgoingMessage::text(format!("Роль пользователя {target} изменена на {role}"))
}

/// Notification for the user whose role was changed
pub fn role_granted(role: Role) -> OutgoingMessage {
    main_menu(role).with_text(format!("Вам назначена роль: {role}. Меню обновлено:"))
}
