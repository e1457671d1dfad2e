use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use rollwise_core::domain::agent::{Agent, AgentId, AgentRole};
use rollwise_core::domain::booking::{BookedInterval, BookingRecord, BookingStatus};
use rollwise_core::domain::user::{User, UserId};

use super::{AgentMember, AgentRepository, BookingRepository, RepositoryError};

#[derive(Clone, Debug)]
struct Membership {
    role: AgentRole,
    joined_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<String, Agent>>,
    users: RwLock<HashMap<String, User>>,
    memberships: RwLock<HashMap<(String, String), Membership>>,
}

impl InMemoryAgentRepository {
    /// Makes `user` resolvable by `list_members`.
    pub async fn register_user(&self, user: User) {
        self.users.write().await.insert(user.id.0.clone(), user);
    }
}

#[async_trait::async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn create(&self, agent: &Agent, owner: &UserId) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write().await;
        if let Some(phone) = agent.phone_number.as_deref() {
            if agents.values().any(|other| other.phone_number.as_deref() == Some(phone)) {
                return Err(RepositoryError::Conflict(format!("phone number {phone} is taken")));
            }
        }
        agents.insert(agent.id.0.clone(), agent.clone());
        self.memberships.write().await.insert(
            (agent.id.0.clone(), owner.0.clone()),
            Membership { role: AgentRole::Owner, joined_at: agent.created_at },
        );
        Ok(())
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.read().await.get(&id.0).cloned())
    }

    async fn find_active(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.read().await.get(&id.0).filter(|agent| agent.active).cloned())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Agent>, RepositoryError> {
        let agents = self.agents.read().await;
        let memberships = self.memberships.read().await;
        let mut owned: Vec<Agent> = memberships
            .keys()
            .filter(|(_, member)| member == &user_id.0)
            .filter_map(|(agent_id, _)| agents.get(agent_id))
            .filter(|agent| agent.active)
            .cloned()
            .collect();
        owned.sort_by_key(|agent| agent.created_at);
        Ok(owned)
    }

    async fn update(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write().await;
        if let Some(stored) = agents.get_mut(&agent.id.0) {
            let phone_number = stored.phone_number.clone();
            let calendar_id = stored.calendar_id.clone();
            *stored = agent.clone();
            stored.phone_number = phone_number;
            stored.calendar_id = calendar_id;
        }
        Ok(())
    }

    async fn soft_delete(&self, id: &AgentId) -> Result<bool, RepositoryError> {
        let mut agents = self.agents.write().await;
        match agents.get_mut(&id.0) {
            Some(agent) if agent.active => {
                agent.active = false;
                agent.phone_number = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_calendar_id(
        &self,
        id: &AgentId,
        calendar_id: &str,
    ) -> Result<(), RepositoryError> {
        if let Some(agent) = self.agents.write().await.get_mut(&id.0) {
            agent.calendar_id = Some(calendar_id.to_string());
        }
        Ok(())
    }

    async fn set_phone_number(
        &self,
        id: &AgentId,
        phone_number: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write().await;
        if let Some(phone) = phone_number {
            let taken = agents
                .values()
                .any(|other| other.id != *id && other.phone_number.as_deref() == Some(phone));
            if taken {
                return Err(RepositoryError::Conflict(format!("phone number {phone} is taken")));
            }
        }
        if let Some(agent) = agents.get_mut(&id.0) {
            agent.phone_number = phone_number.map(str::to_string);
        }
        Ok(())
    }

    async fn role_of(
        &self,
        agent_id: &AgentId,
        user_id: &UserId,
    ) -> Result<Option<AgentRole>, RepositoryError> {
        let memberships = self.memberships.read().await;
        Ok(memberships.get(&(agent_id.0.clone(), user_id.0.clone())).map(|member| member.role))
    }

    async fn list_members(&self, agent_id: &AgentId) -> Result<Vec<AgentMember>, RepositoryError> {
        let users = self.users.read().await;
        let memberships = self.memberships.read().await;
        let mut members: Vec<AgentMember> = memberships
            .iter()
            .filter(|((agent, _), _)| agent == &agent_id.0)
            .filter_map(|((_, user_id), membership)| {
                users.get(user_id).map(|user| AgentMember {
                    user: user.clone(),
                    role: membership.role,
                    joined_at: membership.joined_at,
                })
            })
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.user.email.cmp(&b.user.email)));
        Ok(members)
    }

    async fn add_member(
        &self,
        agent_id: &AgentId,
        user_id: &UserId,
        role: AgentRole,
    ) -> Result<(), RepositoryError> {
        let mut memberships = self.memberships.write().await;
        let key = (agent_id.0.clone(), user_id.0.clone());
        if memberships.contains_key(&key) {
            return Err(RepositoryError::Conflict("user is already a member".to_string()));
        }
        memberships.insert(key, Membership { role, joined_at: Utc::now() });
        Ok(())
    }

    async fn remove_member(
        &self,
        agent_id: &AgentId,
        user_id: &UserId,
    ) -> Result<bool, RepositoryError> {
        let mut memberships = self.memberships.write().await;
        Ok(memberships.remove(&(agent_id.0.clone(), user_id.0.clone())).is_some())
    }

    async fn owner_count(&self, agent_id: &AgentId) -> Result<i64, RepositoryError> {
        let memberships = self.memberships.read().await;
        let count = memberships
            .iter()
            .filter(|((agent, _), member)| agent == &agent_id.0 && member.role == AgentRole::Owner)
            .count();
        Ok(count as i64)
    }
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<HashMap<String, BookingRecord>>,
}

#[async_trait::async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn record(&self, booking: &BookingRecord) -> Result<(), RepositoryError> {
        let mut bookings = self.bookings.write().await;
        let mut stored = booking.clone();
        if let Some(existing) = bookings.get(&booking.external_event_id) {
            if stored.phone_number.is_none() {
                stored.phone_number = existing.phone_number.clone();
            }
            stored.id = existing.id.clone();
        }
        bookings.insert(booking.external_event_id.clone(), stored);
        Ok(())
    }

    async fn find_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<BookingRecord>, RepositoryError> {
        Ok(self.bookings.read().await.get(external_event_id).cloned())
    }

    async fn mark_cancelled(&self, external_event_id: &str) -> Result<bool, RepositoryError> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(external_event_id) {
            Some(booking) if booking.status == BookingStatus::Confirmed => {
                booking.status = BookingStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upcoming_for_phone(
        &self,
        agent_id: &AgentId,
        phone_number: &str,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BookingRecord>, RepositoryError> {
        let bookings = self.bookings.read().await;
        let mut upcoming: Vec<BookingRecord> = bookings
            .values()
            .filter(|booking| booking.agent_id == *agent_id)
            .filter(|booking| booking.status == BookingStatus::Confirmed)
            .filter(|booking| booking.phone_number.as_deref() == Some(phone_number))
            .filter(|booking| booking.start_time > after)
            .cloned()
            .collect();
        upcoming.sort_by_key(|booking| booking.start_time);
        upcoming.truncate(limit as usize);
        Ok(upcoming)
    }

    async fn booked_intervals(
        &self,
        agent_id: &AgentId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BookedInterval>, RepositoryError> {
        let bookings = self.bookings.read().await;
        let mut intervals: Vec<BookedInterval> = bookings
            .values()
            .filter(|booking| booking.agent_id == *agent_id)
            .filter(|booking| booking.status == BookingStatus::Confirmed)
            .map(|booking| BookedInterval::new(booking.start_time, booking.end_time))
            .filter(|interval| interval.overlaps(start, end))
            .collect();
        intervals.sort_by_key(|interval| interval.start);
        Ok(intervals)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use rollwise_core::domain::agent::{AgentId, AgentRole, NewAgent};
    use rollwise_core::domain::booking::{BookingRecord, BookingStatus};
    use rollwise_core::domain::user::UserId;

    use super::{InMemoryAgentRepository, InMemoryBookingRepository};
    use crate::repositories::{AgentRepository, BookingRepository, RepositoryError};

    #[tokio::test]
    async fn agent_repository_tracks_owner_and_phone_numbers() {
        let repo = InMemoryAgentRepository::default();
        let owner = UserId("u-1".into());
        let mut draft = NewAgent::with_defaults("Desk", None, None, "owner@example.com");
        draft.phone_number = Some("+15550100".into());
        let agent = draft.into_agent(AgentId("a-1".into()), Utc::now());
        repo.create(&agent, &owner).await.expect("create");

        assert_eq!(repo.role_of(&agent.id, &owner).await.expect("role"), Some(AgentRole::Owner));

        let other = NewAgent::with_defaults("Other", None, None, "owner@example.com")
            .into_agent(AgentId("a-2".into()), Utc::now());
        repo.create(&other, &owner).await.expect("second");
        let conflict = repo.set_phone_number(&other.id, Some("+15550100")).await;
        assert!(matches!(conflict, Err(RepositoryError::Conflict(_))));

        assert!(repo.soft_delete(&agent.id).await.expect("delete"));
        repo.set_phone_number(&other.id, Some("+15550100")).await.expect("number freed");
        assert_eq!(repo.list_for_user(&owner).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn booking_repository_ignores_cancelled_bookings() {
        let repo = InMemoryBookingRepository::default();
        let agent_id = AgentId("a-1".into());
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 13, 0, 0).single().expect("start");
        let record = BookingRecord {
            id: "b-1".into(),
            agent_id: agent_id.clone(),
            external_event_id: "evt-1".into(),
            summary: "Visit".into(),
            start_time: start,
            end_time: start + Duration::minutes(30),
            phone_number: None,
            status: BookingStatus::Confirmed,
        };
        repo.record(&record).await.expect("record");

        let window_end = start + Duration::hours(1);
        assert_eq!(repo.booked_intervals(&agent_id, start, window_end).await.expect("list").len(), 1);
        assert!(repo.mark_cancelled("evt-1").await.expect("cancel"));
        assert!(repo.booked_intervals(&agent_id, start, window_end).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn upcoming_bookings_match_the_callers_number() {
        let repo = InMemoryBookingRepository::default();
        let agent_id = AgentId("a-1".into());
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).single().expect("now");
        for (event_id, hours, phone) in
            [("evt-1", 4, "+15550100"), ("evt-2", 2, "+15550100"), ("evt-3", 1, "+15550199")]
        {
            let start = now + Duration::hours(hours);
            repo.record(&BookingRecord {
                id: format!("b-{event_id}"),
                agent_id: agent_id.clone(),
                external_event_id: event_id.into(),
                summary: "Visit".into(),
                start_time: start,
                end_time: start + Duration::minutes(30),
                phone_number: Some(phone.into()),
                status: BookingStatus::Confirmed,
            })
            .await
            .expect("record");
        }

        let upcoming =
            repo.upcoming_for_phone(&agent_id, "+15550100", now, 5).await.expect("upcoming");
        let ids: Vec<&str> =
            upcoming.iter().map(|booking| booking.external_event_id.as_str()).collect();
        assert_eq!(ids, vec!["evt-2", "evt-1"]);
    }
}
