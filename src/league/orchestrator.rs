//! Round loop of a started league.
//!
//! Each round is announced to every active agent; referees pick their
//! matches from the announcement and report results back to the league
//! manager, which feeds them to the [`RoundTracker`](super::round_tracker::RoundTracker).
//! The loop moves on once every result arrived or the round deadline passed.

use anyhow::Context;
use tracing::{info, instrument, warn};

use crate::agent::{AgentType, LEAGUE_MANAGER};
use crate::game::OutcomeReason;
use crate::protocol::builders;
use crate::protocol::messages::{
    LeagueStandingsUpdate, RoundAnnouncement, RoundCompleted, RoundSummary, ScheduledMatch,
};
use crate::protocol::Message;

use super::record::MatchRecord;
use super::schedule::{build_schedule, Fixture};
use super::standings::Standings;
use super::{LeagueManager, LeagueStatus};

/// Plays every round of the league, moving it to
/// [`LeagueStatus::Completed`] or, on failure, [`LeagueStatus::Error`].
pub(crate) async fn run(manager: LeagueManager) {
    if let Err(e) = play(&manager).await {
        manager.fail(format!("{e:#}"));
    }
}

#[instrument(skip_all, fields(league_id = %manager.inner.config.league_id))]
async fn play(manager: &LeagueManager) -> anyhow::Result<()> {
    let inner = &manager.inner;
    let players = inner.registry.list_active(Some(AgentType::Player));
    let referees = inner.registry.list_active(Some(AgentType::Referee));
    if players.len() < 2 {
        anyhow::bail!(
            "at least two players are needed, {} registered",
            players.len()
        );
    }
    if referees.is_empty() {
        anyhow::bail!("no referee registered");
    }

    let schedule = build_schedule(&players, &referees);
    let total_rounds = u32::try_from(schedule.len()).context("too many rounds")?;
    let total_matches: usize = schedule.iter().map(Vec::len).sum();
    info!(
        players = players.len(),
        referees = referees.len(),
        total_rounds,
        total_matches,
        "schedule built"
    );

    *manager.lock_standings() = Standings::new(players.iter().map(|id| {
        let name = inner.registry.display_name(id).unwrap_or_else(|| id.clone());
        (id.clone(), name)
    }));
    {
        let mut state = manager.lock_state();
        state.schedule.clone_from(&schedule);
        state.total_rounds = total_rounds;
    }
    manager.persist_standings().await;

    for (round_id, fixtures) in (1u32..).zip(&schedule) {
        play_round(manager, round_id, fixtures, total_rounds).await?;
    }

    let final_standings = manager.standings();
    let completed = builders::league_completed(
        LEAGUE_MANAGER,
        &inner.config.league_id,
        total_rounds,
        total_matches,
        final_standings,
    );
    inner
        .messenger
        .broadcast(inner.registry.active_endpoints(), &completed);
    manager.lock_state().status = LeagueStatus::Completed;
    info!(champion = ?manager.standings().first().map(|r| r.player_id.clone()), "league completed");

    schedule_shutdown(manager);
    Ok(())
}

#[instrument(skip(manager, fixtures, total_rounds))]
async fn play_round(
    manager: &LeagueManager,
    round_id: u32,
    fixtures: &[Fixture],
    total_rounds: u32,
) -> anyhow::Result<()> {
    let inner = &manager.inner;
    let league_id = inner.config.league_id.clone();
    manager.lock_state().current_round = round_id;

    let matches = fixtures
        .iter()
        .map(|f| scheduled_match(manager, f))
        .collect::<anyhow::Result<Vec<_>>>()?;
    inner
        .tracker
        .start_round(round_id, fixtures.iter().map(|f| f.match_id.clone()))?;

    let announcement = Message::new(
        LEAGUE_MANAGER,
        RoundAnnouncement {
            league_id: league_id.clone(),
            round_id,
            matches,
            standings: manager.standings(),
        },
    );
    inner
        .messenger
        .broadcast(inner.registry.active_endpoints(), &announcement);
    info!(matches = fixtures.len(), "round announced");

    let results = inner
        .tracker
        .wait_for_round_complete(round_id, inner.config.round_timeout(fixtures.len()))
        .await;
    manager.persist_standings().await;

    let summary = summarize(fixtures.len(), &results);
    if summary.completed < summary.scheduled {
        warn!(
            missing = summary.scheduled - summary.completed,
            "round closed with missing results"
        );
    }
    let completed = Message::new(
        LEAGUE_MANAGER,
        RoundCompleted {
            league_id: league_id.clone(),
            round_id,
            matches_completed: results.len(),
            next_round_id: (round_id < total_rounds).then_some(round_id + 1),
            summary,
        },
    );
    let update = Message::new(
        LEAGUE_MANAGER,
        LeagueStandingsUpdate {
            league_id,
            round_id,
            standings: manager.standings(),
        },
    );
    let endpoints = inner.registry.active_endpoints();
    inner.messenger.broadcast(endpoints.clone(), &completed);
    inner.messenger.broadcast(endpoints, &update);

    inner.tracker.cleanup_round(round_id);
    info!(?summary, "round completed");
    Ok(())
}

fn scheduled_match(manager: &LeagueManager, fixture: &Fixture) -> anyhow::Result<ScheduledMatch> {
    let registry = &manager.inner.registry;
    let endpoint = |id: &str| {
        registry
            .endpoint(id)
            .with_context(|| format!("no endpoint known for '{id}'"))
    };
    Ok(ScheduledMatch {
        match_id: fixture.match_id.clone(),
        game_type: manager.inner.config.game_type.clone(),
        player_a_id: fixture.player_a.clone(),
        player_b_id: fixture.player_b.clone(),
        player_a_endpoint: endpoint(&fixture.player_a)?,
        player_b_endpoint: endpoint(&fixture.player_b)?,
        referee_id: fixture.referee_id.clone(),
        referee_endpoint: endpoint(&fixture.referee_id)?,
    })
}

fn summarize(scheduled: usize, results: &[MatchRecord]) -> RoundSummary {
    let mut summary = RoundSummary {
        scheduled,
        completed: results.len(),
        ..RoundSummary::default()
    };
    for record in results {
        if record.is_draw() {
            summary.draws += 1;
        } else {
            summary.decisive += 1;
        }
        if record.reason == OutcomeReason::NoShow {
            summary.technical += 1;
        }
    }
    summary
}

fn schedule_shutdown(manager: &LeagueManager) {
    let inner = manager.inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(inner.config.shutdown_delay).await;
        inner.registry.close_all();
        inner.shutdown.trigger();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::league::record::record;

    #[test]
    fn summary_counts_each_kind_of_result() {
        let mut no_show = record("R1M3", "P05", "P06", Some("P05"));
        no_show.reason = OutcomeReason::NoShow;
        let results = [
            record("R1M1", "P01", "P02", Some("P01")),
            record("R1M2", "P03", "P04", None),
            no_show,
        ];
        let summary = summarize(4, &results);
        assert_eq!(
            summary,
            RoundSummary {
                scheduled: 4,
                completed: 3,
                decisive: 2,
                draws: 1,
                technical: 1,
            }
        );
    }
}
