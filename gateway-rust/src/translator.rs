//! # translator
//!
//! Turns a route plan from the navigation application into a platform command
//! the simulation bus understands.
//!
//! A plan is accepted only when its identity equals the gateway's current
//! identity. Every waypoint speed is replaced by the selected target's last
//! reported speed, or by the configured fallback when the target has never
//! reported. Either the whole command is produced or nothing is.

use std::sync::Arc;

use range_types::{CommandKind, CommandParams, PlatformCommand, RoutePlan, StampedWaypoint};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TranslateError;
use crate::identity::IdentityRegistry;
use crate::notify::TranslationOutcome;
use crate::state::{SharedPlatforms, SharedTarget};

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub command: PlatformCommand,
    /// Waypoints stamped with the fallback speed
    pub fallback_count: usize,
}

impl Translation {
    pub fn waypoint_count(&self) -> usize {
        match &self.command.params {
            CommandParams::Route { waypoints, .. } => waypoints.len(),
            _ => 0,
        }
    }

    pub fn outcome(&self) -> TranslationOutcome {
        TranslationOutcome {
            accepted: true,
            command_id: Some(self.command.command_id.clone()),
            target_platform: Some(self.command.target_platform.clone()),
            waypoint_count: self.waypoint_count(),
            fallback_count: self.fallback_count,
            error: None,
        }
    }
}

impl TranslationOutcome {
    /// Translation succeeded but the command never reached the wire.
    pub fn not_sent(self) -> Self {
        Self {
            accepted: false,
            command_id: None,
            error: Some("command was not sent: outbound queue unavailable".to_string()),
            ..self
        }
    }

    pub fn rejected(plan: &RoutePlan, error: &TranslateError) -> Self {
        Self {
            accepted: false,
            command_id: None,
            target_platform: None,
            waypoint_count: plan.waypoints.len(),
            fallback_count: 0,
            error: Some(error.to_string()),
        }
    }
}

pub struct RouteTranslator {
    identity: Arc<IdentityRegistry>,
    platforms: SharedPlatforms,
    target: SharedTarget,
    fallback_speed_mps: f64,
}

impl RouteTranslator {
    pub fn new(
        identity: Arc<IdentityRegistry>,
        platforms: SharedPlatforms,
        target: SharedTarget,
        fallback_speed_mps: f64,
    ) -> Self {
        Self {
            identity,
            platforms,
            target,
            fallback_speed_mps,
        }
    }

    pub async fn handle(&self, plan: &RoutePlan) -> Result<Translation, TranslateError> {
        let expected = self.identity.current().await;
        if plan.identity != expected {
            warn!(
                "Route plan rejected: identity {} does not match current identity {}",
                plan.identity, expected
            );
            return Err(TranslateError::IdentityMismatch {
                expected,
                received: plan.identity,
            });
        }

        if plan.waypoints.is_empty() {
            info!("Route plan for identity {expected} has no waypoints, dropped");
            return Err(TranslateError::EmptyRoute);
        }

        let Some(target) = self.target.read().await.clone() else {
            info!("Route plan for identity {expected} arrived with no target selected, dropped");
            return Err(TranslateError::NoTargetSelected);
        };

        let known_speed = self.platforms.read().await.speed_of(&target);
        let (speed_mps, using_fallback) = match known_speed {
            Some(speed) => (speed, false),
            None => {
                debug!("No status for {target}, stamping fallback speed {}", self.fallback_speed_mps);
                (self.fallback_speed_mps, true)
            }
        };

        let waypoints: Vec<StampedWaypoint> = plan
            .waypoints
            .iter()
            .map(|wp| StampedWaypoint {
                position: wp.position,
                label: wp.label.clone(),
                speed_mps,
                using_fallback,
            })
            .collect();
        let fallback_count = if using_fallback { waypoints.len() } else { 0 };

        let command = PlatformCommand {
            command_id: Uuid::new_v4().to_string(),
            target_platform: target,
            kind: CommandKind::FollowRoute,
            params: CommandParams::Route {
                route_kind: plan.route_kind,
                waypoints,
            },
        };
        info!(
            "Translated {:?} route ({} waypoints) for {} as command {}",
            plan.route_kind,
            plan.waypoints.len(),
            command.target_platform,
            command.command_id
        );

        Ok(Translation {
            command,
            fallback_count,
        })
    }
}
