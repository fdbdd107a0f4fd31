use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    Autonomous,
    Supervised,
    Manual,
}

impl AutonomyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AutonomyMode::Autonomous => "autonomous",
            AutonomyMode::Supervised => "supervised",
            AutonomyMode::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: String,
    pub label: String,
    pub autonomy_mode: AutonomyMode,
    pub permissions: Vec<String>,
    pub systems_access: Vec<String>,
}

impl Seat {
    fn new(
        id: &str,
        label: &str,
        autonomy_mode: AutonomyMode,
        permissions: &[&str],
        systems_access: &[&str],
    ) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            autonomy_mode,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            systems_access: systems_access.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Seat that receives Smart Bill review escalations.
pub const REVIEW_SEAT_ID: &str = "ops-lead";

pub fn roster_seats() -> Vec<Seat> {
    vec![
        Seat::new(
            "queue-manager",
            "Queue Manager",
            AutonomyMode::Autonomous,
            &["queue.manage", "appfolio.comms", "scheduler.manage"],
            &["queue-service", "appfolio"],
        ),
        Seat::new(
            "ops-lead",
            "Operations Lead",
            AutonomyMode::Supervised,
            &["review.approve", "retro.run", "standup.run"],
            &["appfolio", "review-desk"],
        ),
        Seat::new(
            "reports-analyst",
            "Reports Analyst",
            AutonomyMode::Autonomous,
            &["appfolio.reports", "appfolio.workflows"],
            &["appfolio"],
        ),
        Seat::new(
            "comms-coordinator",
            "Comms Coordinator",
            AutonomyMode::Supervised,
            &["appfolio.comms", "broadcast.send"],
            &["appfolio", "queue-service"],
        ),
        Seat::new(
            "patrol-bot",
            "Patrol Bot",
            AutonomyMode::Autonomous,
            &["patrol.run", "queue.inspect"],
            &["queue-service"],
        ),
        Seat::new(
            "incident-commander",
            "Incident Commander",
            AutonomyMode::Manual,
            &["incident.declare", "deploy.approve", "security.block"],
            &["pager", "appfolio"],
        ),
    ]
}

pub fn find_seat(seat_id: &str) -> Option<Seat> {
    roster_seats().into_iter().find(|seat| seat.id == seat_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_ids_are_unique() {
        let seats = roster_seats();
        let mut ids: Vec<&str> = seats.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), seats.len());
    }

    #[test]
    fn review_seat_exists_and_is_supervised() {
        let seat = find_seat(REVIEW_SEAT_ID).expect("review seat");
        assert_eq!(seat.autonomy_mode, AutonomyMode::Supervised);
    }
}
