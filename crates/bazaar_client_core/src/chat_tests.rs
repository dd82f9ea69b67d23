use std::sync::Arc;
use std::time::Duration;

use bazaar_domain::{RoomKind, RoomName, UserId};
use bazaar_platform::memory::MemoryBackend;
use bazaar_platform::{AuthChange, AuthProvider, DataStore, NewMessage};

use crate::chat::{ChatController, ChatDeps, ChatEvent, start_chat};
use crate::ClientConfig;

fn user(id: &str) -> UserId {
	UserId::new(id).expect("valid UserId")
}

fn deps(backend: &MemoryBackend, config: ClientConfig) -> ChatDeps {
	ChatDeps {
		auth: Arc::new(backend.clone()),
		store: Arc::new(backend.clone()),
		feed: Arc::new(backend.clone()),
		relay: Arc::new(backend.clone()),
		watermarks: Arc::new(backend.clone()),
		config,
	}
}

/// Skip events until `pred` yields a value, with a hard timeout.
async fn wait_for<T>(ctl: &mut ChatController, mut pred: impl FnMut(ChatEvent) -> Option<T>) -> T {
	tokio::time::timeout(Duration::from_secs(2), async {
		loop {
			let event = ctl.recv_event().await.expect("chat task stopped");
			if let Some(value) = pred(event) {
				return value;
			}
		}
	})
	.await
	.expect("timed out waiting for chat event")
}

#[tokio::test]
async fn open_without_session_asks_for_login() {
	let backend = MemoryBackend::new();
	let mut ctl = start_chat(deps(&backend, ClientConfig::default()));

	ctl.open().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::SessionRequired).then_some(())).await;
	assert!(backend.rooms().is_empty());
}

#[tokio::test]
async fn customer_open_provisions_one_ticket_room() {
	let backend = MemoryBackend::new();
	let customer = user("cust-1");
	backend.sign_in(&customer);
	let mut ctl = start_chat(deps(&backend, ClientConfig::default()));

	ctl.open().unwrap();
	let room = wait_for(&mut ctl, |e| match e {
		ChatEvent::RoomOpened(room) => Some(room),
		_ => None,
	})
	.await;
	assert_eq!(room.name.kind(), RoomKind::Ticket(customer));

	// Re-opening converges on the same room instead of creating another.
	ctl.open().unwrap();
	let again = wait_for(&mut ctl, |e| match e {
		ChatEvent::RoomOpened(room) => Some(room),
		_ => None,
	})
	.await;
	assert_eq!(again.id, room.id);
	assert_eq!(backend.rooms().len(), 1);
}

#[tokio::test]
async fn blank_messages_never_reach_the_store() {
	let backend = MemoryBackend::new();
	backend.sign_in(&user("cust-1"));
	let mut ctl = start_chat(deps(&backend, ClientConfig::default()));

	ctl.open().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::RoomOpened(_)).then_some(())).await;

	ctl.send_message("   \n\t").unwrap();
	let warning = wait_for(&mut ctl, |e| match e {
		ChatEvent::Warning(text) => Some(text),
		_ => None,
	})
	.await;
	assert!(warning.contains("empty"));
	assert_eq!(backend.message_insert_attempts(), 0);
}

#[tokio::test]
async fn customer_send_echoes_and_alerts_support() {
	let backend = MemoryBackend::new();
	let customer = user("cust-1");
	backend.sign_in(&customer);
	let mut ctl = start_chat(deps(&backend, ClientConfig::default()));

	ctl.open().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::RoomOpened(_)).then_some(())).await;

	ctl.send_message("  my order never arrived  ").unwrap();
	let appended = wait_for(&mut ctl, |e| match e {
		ChatEvent::MessageAppended { message, .. } => Some(message),
		_ => None,
	})
	.await;
	assert_eq!(appended.message.text, "my order never arrived");
	assert!(appended.mine);

	let calls = backend.relay_calls();
	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].0, RoomName::ticket(&customer));
	assert_eq!(calls[0].1, "my order never arrived");
}

#[tokio::test]
async fn operator_send_does_not_alert_support() {
	let backend = MemoryBackend::new();
	let op = user("op-1");
	let customer = user("cust-1");
	let room = backend.insert_room(&RoomName::ticket(&customer), &customer).await.unwrap();
	backend
		.insert_message(NewMessage {
			room_id: room.id,
			author: customer.clone(),
			text: "help".to_string(),
		})
		.await
		.unwrap();
	backend.sign_in(&op);
	let mut ctl = start_chat(deps(&backend, ClientConfig::with_operator(op)));

	ctl.open().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::RoomOpened(_)).then_some(())).await;

	ctl.send_message("we are looking into it").unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::MessageAppended { .. }).then_some(())).await;
	assert!(backend.relay_calls().is_empty());
}

#[tokio::test]
async fn relay_failure_does_not_lose_the_message() {
	let backend = MemoryBackend::new();
	backend.sign_in(&user("cust-1"));
	backend.set_fail_relay(true);
	let mut ctl = start_chat(deps(&backend, ClientConfig::default()));

	ctl.open().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::RoomOpened(_)).then_some(())).await;

	ctl.send_message("anyone there?").unwrap();
	let warning = wait_for(&mut ctl, |e| match e {
		ChatEvent::Warning(text) => Some(text),
		_ => None,
	})
	.await;
	assert!(warning.contains("not alerted"));
	assert_eq!(backend.message_insert_attempts(), 1);
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::MessageAppended { .. }).then_some(())).await;
}

#[tokio::test]
async fn operator_inbox_marks_new_tickets_unread_then_clears_on_open() {
	let backend = MemoryBackend::new();
	backend.set_now_ms(1_000);
	let op = user("op-1");
	let customer = user("cust-1");
	let room = backend.insert_room(&RoomName::ticket(&customer), &customer).await.unwrap();
	backend
		.insert_message(NewMessage {
			room_id: room.id,
			author: customer.clone(),
			text: "my skin vanished".to_string(),
		})
		.await
		.unwrap();
	backend.sign_in(&op);
	let mut ctl = start_chat(deps(&backend, ClientConfig::with_operator(op)));

	ctl.open().unwrap();
	let first = wait_for(&mut ctl, |e| match e {
		ChatEvent::InboxUpdated(entries) => Some(entries),
		_ => None,
	})
	.await;
	assert!(first[0].meta.as_ref().unwrap().unread);

	// Auto-selecting the room advances the watermark and clears the flag.
	let second = wait_for(&mut ctl, |e| match e {
		ChatEvent::InboxUpdated(entries) => Some(entries),
		_ => None,
	})
	.await;
	assert!(!second[0].meta.as_ref().unwrap().unread);
}

#[tokio::test]
async fn badge_counts_while_closed_and_resets_on_open() {
	let backend = MemoryBackend::new();
	let customer = user("cust-1");
	backend.sign_in(&customer);
	let mut ctl = start_chat(deps(&backend, ClientConfig::default()));

	ctl.open().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::RoomOpened(_)).then_some(())).await;
	ctl.close().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::UnreadBadge(0)).then_some(())).await;

	// An operator reply lands while the panel is closed.
	let room = backend.rooms()[0].clone();
	backend
		.insert_message(NewMessage {
			room_id: room.id,
			author: user("op-1"),
			text: "refund issued".to_string(),
		})
		.await
		.unwrap();
	let badge = wait_for(&mut ctl, |e| match e {
		ChatEvent::UnreadBadge(n) => Some(n),
		_ => None,
	})
	.await;
	assert_eq!(badge, 1);

	ctl.open().unwrap();
	let badge = wait_for(&mut ctl, |e| match e {
		ChatEvent::UnreadBadge(n) => Some(n),
		_ => None,
	})
	.await;
	assert_eq!(badge, 0);
}

#[tokio::test]
async fn switching_rooms_leaves_one_live_subscription() {
	let backend = MemoryBackend::new();
	backend.set_now_ms(1_000);
	let op = user("op-1");
	let cust_a = user("cust-a");
	let cust_b = user("cust-b");
	let room_a = backend.insert_room(&RoomName::ticket(&cust_a), &cust_a).await.unwrap();
	let room_b = backend.insert_room(&RoomName::ticket(&cust_b), &cust_b).await.unwrap();
	backend.sign_in(&op);
	let mut ctl = start_chat(deps(&backend, ClientConfig::with_operator(op)));

	// No messages anywhere, so the most recently created room wins.
	ctl.open().unwrap();
	let opened = wait_for(&mut ctl, |e| match e {
		ChatEvent::RoomOpened(room) => Some(room),
		_ => None,
	})
	.await;
	assert_eq!(opened.id, room_b.id);
	assert_eq!(backend.subscriber_count(room_b.id), 1);

	ctl.select_room(room_a.id).unwrap();
	let opened = wait_for(&mut ctl, |e| match e {
		ChatEvent::RoomOpened(room) => Some(room),
		_ => None,
	})
	.await;
	assert_eq!(opened.id, room_a.id);
	assert_eq!(backend.subscriber_count(room_a.id), 1);
	assert_eq!(backend.subscriber_count(room_b.id), 0);
}

#[tokio::test]
async fn only_operators_create_named_rooms() {
	let backend = MemoryBackend::new();
	let customer = user("cust-1");
	backend.sign_in(&customer);
	let mut ctl = start_chat(deps(&backend, ClientConfig::default()));

	ctl.open().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::RoomOpened(_)).then_some(())).await;

	ctl.create_room(RoomName::new("escalations").unwrap()).unwrap();
	let warning = wait_for(&mut ctl, |e| match e {
		ChatEvent::Warning(text) => Some(text),
		_ => None,
	})
	.await;
	assert!(warning.contains("not allowed"));
	assert_eq!(backend.rooms().len(), 1);
}

#[tokio::test]
async fn operator_creates_and_opens_named_room() {
	let backend = MemoryBackend::new();
	let op = user("op-1");
	backend.sign_in(&op);
	let mut ctl = start_chat(deps(&backend, ClientConfig::with_operator(op)));

	ctl.open().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::InboxUpdated(_)).then_some(())).await;

	ctl.create_room(RoomName::new("escalations").unwrap()).unwrap();
	let opened = wait_for(&mut ctl, |e| match e {
		ChatEvent::RoomOpened(room) => Some(room),
		_ => None,
	})
	.await;
	assert_eq!(opened.name.as_str(), "escalations");
}

#[tokio::test]
async fn direct_room_name_is_canonical_for_both_sides() {
	let backend = MemoryBackend::new();
	let alice = user("alice-id");
	let bob = user("bob-id");
	backend.sign_in(&alice);
	let mut ctl = start_chat(deps(&backend, ClientConfig::default()));

	ctl.open().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::RoomOpened(_)).then_some(())).await;

	ctl.open_direct(bob.clone()).unwrap();
	let opened = wait_for(&mut ctl, |e| match e {
		ChatEvent::RoomOpened(room) => Some(room),
		_ => None,
	})
	.await;
	assert_eq!(opened.name, RoomName::direct(&bob, &alice).unwrap());
}

#[tokio::test]
async fn sign_out_tears_everything_down() {
	let backend = MemoryBackend::new();
	let customer = user("cust-1");
	backend.sign_in(&customer);
	let mut ctl = start_chat(deps(&backend, ClientConfig::default()));

	ctl.open().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::RoomOpened(_)).then_some(())).await;
	let room = backend.rooms()[0].clone();
	assert_eq!(backend.subscriber_count(room.id), 1);

	backend.sign_out().await.unwrap();
	wait_for(
		&mut ctl,
		|e| matches!(e, ChatEvent::AuthChanged(AuthChange::SignedOut)).then_some(()),
	)
	.await;
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::SessionRequired).then_some(())).await;
	assert_eq!(backend.subscriber_count(room.id), 0);
}

#[tokio::test]
async fn customer_messages_label_operators_as_support() {
	let backend = MemoryBackend::new();
	let customer = user("cust-1");
	let op = user("op-1");
	backend.sign_in(&customer);
	backend.set_display_name(&op, "Dana");
	let mut ctl = start_chat(deps(&backend, ClientConfig::with_operator(op.clone())));

	ctl.open().unwrap();
	wait_for(&mut ctl, |e| matches!(e, ChatEvent::RoomOpened(_)).then_some(())).await;

	let room = backend.rooms()[0].clone();
	backend
		.insert_message(NewMessage {
			room_id: room.id,
			author: op,
			text: "checking now".to_string(),
		})
		.await
		.unwrap();

	let appended = wait_for(&mut ctl, |e| match e {
		ChatEvent::MessageAppended { message, .. } => Some(message),
		_ => None,
	})
	.await;
	assert_eq!(appended.author_label, "Bazaar Support");
	assert!(appended.from_support);
	assert!(!appended.mine);
}
