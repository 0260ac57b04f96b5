use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::clock::Clock;
use crate::connections::ConnectionStatus;
use crate::error::DomainError;
use crate::ports::connections::ConnectionRepository;
use crate::ports::users::UserDirectory;
use crate::scoring::{self, MatchScore};
use crate::users::UserProfile;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 50;
const DEFAULT_MIN_SCORE: f64 = 0.1;

#[derive(Clone, Debug, PartialEq)]
pub struct SuggestionQuery {
    pub limit: usize,
    pub offset: usize,
    pub min_score: f64,
}

impl SuggestionQuery {
    pub fn new(limit: Option<usize>, offset: Option<usize>, min_score: Option<f64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: offset.unwrap_or(0),
            min_score: min_score.unwrap_or(DEFAULT_MIN_SCORE).clamp(0.0, 1.0),
        }
    }
}

impl Default for SuggestionQuery {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Suggestion {
    pub user_id: String,
    pub first_name: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub interest_ids: Vec<String>,
    /// Candidate interests the viewer also holds, in the candidate's order.
    pub shared_interest_ids: Vec<String>,
    pub shared_count: usize,
    pub total_interests: usize,
    pub last_active_at_ms: Option<i64>,
    pub score: MatchScore,
}

impl Suggestion {
    fn from_profile(
        profile: UserProfile,
        viewer_interests: &HashSet<&str>,
        score: MatchScore,
    ) -> Self {
        let shared_interest_ids: Vec<String> = profile
            .interest_ids
            .iter()
            .filter(|interest_id| viewer_interests.contains(interest_id.as_str()))
            .cloned()
            .collect();
        Self {
            user_id: profile.user_id,
            first_name: profile.first_name,
            city: profile.city,
            state: profile.state,
            country: profile.country,
            shared_count: shared_interest_ids.len(),
            total_interests: profile.interest_ids.len(),
            shared_interest_ids,
            interest_ids: profile.interest_ids,
            last_active_at_ms: profile.last_active_at_ms,
            score,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuggestionPage {
    pub matches: Vec<Suggestion>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterestFlag {
    pub interest_id: String,
    pub shared: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionRef {
    pub connection_id: String,
    pub status: ConnectionStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CandidateDetail {
    pub user_id: String,
    pub first_name: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub last_active_at_ms: Option<i64>,
    pub interests: Vec<InterestFlag>,
    pub shared_interest_count: usize,
    pub score: MatchScore,
    pub connection: Option<ConnectionRef>,
}

/// Orders by score descending, then user id ascending so equal scores page
/// deterministically.
pub fn rank(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(|a, b| match b.score.total.total_cmp(&a.score.total) {
        Ordering::Equal => a.user_id.cmp(&b.user_id),
        other => other,
    });
}

#[derive(Clone)]
pub struct DiscoveryService {
    connections: Arc<dyn ConnectionRepository>,
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
}

impl DiscoveryService {
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        directory: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            connections,
            directory,
            clock,
        }
    }

    pub async fn suggest(
        &self,
        user_id: &str,
        query: SuggestionQuery,
    ) -> DomainResult<SuggestionPage> {
        let viewer = self.active_viewer(user_id).await?;
        let blocked = self.directory.blocked_user_ids(user_id).await?;
        let related = self.connections.counterpart_ids(user_id).await?;
        let excluded: HashSet<&str> = blocked
            .iter()
            .chain(related.iter())
            .map(String::as_str)
            .chain(std::iter::once(user_id))
            .collect();

        let viewer_interests: HashSet<&str> =
            viewer.interest_ids.iter().map(String::as_str).collect();
        let now = self.clock.now_ms();
        let mut scored: Vec<Suggestion> = self
            .directory
            .list_active_users()
            .await?
            .into_iter()
            .filter(|candidate| candidate.is_active())
            .filter(|candidate| !excluded.contains(candidate.user_id.as_str()))
            .filter_map(|candidate| {
                let score = scoring::score(&viewer, &candidate, now);
                (score.total >= query.min_score)
                    .then(|| Suggestion::from_profile(candidate, &viewer_interests, score))
            })
            .collect();
        rank(&mut scored);

        let total = scored.len();
        let matches = scored
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        tracing::debug!(user_id = %user_id, total, "suggestions computed");
        Ok(SuggestionPage {
            matches,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    pub async fn candidate_detail(
        &self,
        user_id: &str,
        candidate_id: &str,
    ) -> DomainResult<CandidateDetail> {
        let viewer = self.active_viewer(user_id).await?;
        if candidate_id == user_id {
            return Err(DomainError::NotFound);
        }
        let blocked = self.directory.blocked_user_ids(user_id).await?;
        if blocked.contains(candidate_id) {
            return Err(DomainError::NotFound);
        }
        let candidate = self
            .directory
            .get_user(candidate_id)
            .await?
            .filter(UserProfile::is_active)
            .ok_or(DomainError::NotFound)?;

        let score = scoring::score(&viewer, &candidate, self.clock.now_ms());
        let mine: HashSet<&str> = viewer.interest_ids.iter().map(String::as_str).collect();
        let interests: Vec<InterestFlag> = candidate
            .interest_ids
            .iter()
            .map(|interest_id| InterestFlag {
                interest_id: interest_id.clone(),
                shared: mine.contains(interest_id.as_str()),
            })
            .collect();
        let shared_interest_count = interests.iter().filter(|flag| flag.shared).count();
        let connection = self
            .connections
            .find_between(user_id, candidate_id)
            .await?
            .map(|connection| ConnectionRef {
                connection_id: connection.connection_id,
                status: connection.status,
            });

        Ok(CandidateDetail {
            user_id: candidate.user_id,
            first_name: candidate.first_name,
            city: candidate.city,
            state: candidate.state,
            country: candidate.country,
            last_active_at_ms: candidate.last_active_at_ms,
            interests,
            shared_interest_count,
            score,
            connection,
        })
    }

    async fn active_viewer(&self, user_id: &str) -> DomainResult<UserProfile> {
        self.directory
            .get_user(user_id)
            .await?
            .filter(UserProfile::is_active)
            .ok_or_else(|| DomainError::Forbidden("account is not active".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoreBreakdown;

    fn suggestion(user_id: &str, total: f64) -> Suggestion {
        Suggestion {
            user_id: user_id.into(),
            first_name: user_id.into(),
            city: None,
            state: None,
            country: None,
            interest_ids: Vec::new(),
            shared_interest_ids: Vec::new(),
            shared_count: 0,
            total_interests: 0,
            last_active_at_ms: None,
            score: MatchScore {
                total,
                breakdown: ScoreBreakdown {
                    interest: 0,
                    proximity: 0,
                    activity: 0,
                },
            },
        }
    }

    #[test]
    fn ranking_breaks_ties_by_user_id() {
        let mut suggestions = vec![
            suggestion("dave", 0.5),
            suggestion("carol", 0.9),
            suggestion("bob", 0.5),
        ];
        rank(&mut suggestions);
        let order: Vec<&str> = suggestions.iter().map(|s| s.user_id.as_str()).collect();
        assert_eq!(order, vec!["carol", "bob", "dave"]);
    }

    #[test]
    fn query_defaults_and_bounds() {
        let query = SuggestionQuery::default();
        assert_eq!(query.limit, 20);
        assert_eq!(query.offset, 0);
        assert!((query.min_score - 0.1).abs() < f64::EPSILON);
        assert_eq!(SuggestionQuery::new(Some(80), None, None).limit, 50);
    }
}
