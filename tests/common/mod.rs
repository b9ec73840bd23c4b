#![allow(dead_code)]

use std::env;
use std::sync::Arc;

use chrono::Duration;
use fake::Fake;
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use uuid::Uuid;

use groupwork::database::MemoryStore;
use groupwork::database::models::{CreateGroupInput, Group, JoinRequest, Profile, ResolveAction};
use groupwork::realtime::Notifier;
use groupwork::services::auth::Claims;
use groupwork::{AppState, Config};

pub fn setup_test_env() {
    unsafe {
        env::set_var("RUST_LOG", "debug");
    }
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Services wired to an in-memory store, plus handles to poke at it.
pub struct TestContext {
    pub store: MemoryStore,
    pub state: AppState,
    pub config: Config,
}

impl TestContext {
    pub fn new() -> Self {
        let config = Config::test_config();
        let store = MemoryStore::new(Notifier::new(config.realtime_channel_capacity));
        let state = AppState::new(Arc::new(store.clone()), &config);

        Self {
            store,
            state,
            config,
        }
    }

    /// A user with a profile row, as the auth provider would create.
    pub async fn create_user(&self) -> Uuid {
        let user_id = Uuid::new_v4();
        self.store
            .seed_profile(Profile {
                user_id,
                name: Name().fake::<String>(),
                email: SafeEmail().fake::<String>(),
            })
            .await;
        user_id
    }

    pub async fn create_named_user(&self, name: &str) -> Uuid {
        let user_id = Uuid::new_v4();
        self.store
            .seed_profile(Profile {
                user_id,
                name: name.to_string(),
                email: SafeEmail().fake::<String>(),
            })
            .await;
        user_id
    }

    pub fn token(&self, user_id: Uuid) -> String {
        Claims::new(user_id, None, Duration::hours(1))
            .encode(&self.config.jwt_secret)
            .unwrap()
    }

    pub fn bearer(&self, user_id: Uuid) -> (&'static str, String) {
        ("Authorization", format!("Bearer {}", self.token(user_id)))
    }

    pub async fn create_group(&self, owner_id: Uuid, max_members: i32) -> Group {
        self.state
            .membership
            .create_group(owner_id, group_input(max_members))
            .await
            .unwrap()
    }

    /// Group with `members` accepted members besides the owner.
    pub async fn group_with_members(&self, max_members: i32, members: usize) -> (Group, Vec<Uuid>) {
        let owner = self.create_user().await;
        let group = self.create_group(owner, max_members).await;

        let mut member_ids = Vec::with_capacity(members);
        for _ in 0..members {
            let user = self.create_user().await;
            let request = self.request(&group, user).await;
            self.state
                .membership
                .resolve_request(
                    group.id,
                    request.id,
                    ResolveAction::Accept,
                    owner,
                )
                .await
                .unwrap();
            member_ids.push(user);
        }

        (group, member_ids)
    }

    pub async fn request(&self, group: &Group, user_id: Uuid) -> JoinRequest {
        self.state
            .membership
            .request_to_join(group.id, user_id)
            .await
            .unwrap()
    }
}

pub fn group_input(max_members: i32) -> CreateGroupInput {
    CreateGroupInput {
        project_name: format!("{} Project", Name().fake::<String>()),
        supervisor_name: Name().fake::<String>(),
        skills_required: vec!["Rust".to_string(), "SQL".to_string()],
        skills_needed: vec!["Design".to_string()],
        project_outcomes: Some("A working prototype".to_string()),
        max_members,
    }
}
