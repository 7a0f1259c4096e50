//! Local pose sampling and fire triggering

use crate::network::{NetworkPump, PumpError};
use log::debug;
use shared::Vec3;
use std::sync::Arc;

/// Position and Euler rotation (degrees) of the local player.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Vec3,
}

/// Anything the simulation can ask for the local player's current pose.
pub trait PoseSource {
    fn local_pose(&self) -> Pose;
}

impl PoseSource for Pose {
    fn local_pose(&self) -> Pose {
        *self
    }
}

/// Scripted movement for the headless client: a horizontal circle around the
/// origin, facing along the direction of travel.
#[derive(Debug, Clone)]
pub struct OrbitPath {
    radius: f32,
    /// Degrees advanced per frame.
    step: f32,
    angle: f32,
}

impl OrbitPath {
    pub fn new(radius: f32, step: f32) -> Self {
        Self {
            radius,
            step,
            angle: 0.0,
        }
    }

    pub fn advance(&mut self) {
        self.angle = (self.angle + self.step).rem_euclid(360.0);
    }
}

impl PoseSource for OrbitPath {
    fn local_pose(&self) -> Pose {
        let radians = self.angle.to_radians();
        Pose {
            position: Vec3::new(
                self.radius * radians.cos(),
                0.0,
                self.radius * radians.sin(),
            ),
            rotation: Vec3::new(0.0, (self.angle + 90.0).rem_euclid(360.0), 0.0),
        }
    }
}

/// Fires through the pump it was given, at the pose of its source.
///
/// The pump is injected rather than looked up, so any number of triggers can
/// share one connection.
pub struct FireTrigger {
    pump: Arc<NetworkPump>,
    /// Fire automatically every this many frames; `0` disables.
    every: u32,
    frames: u32,
    shots: u32,
}

impl FireTrigger {
    pub fn new(pump: Arc<NetworkPump>, every: u32) -> Self {
        Self {
            pump,
            every,
            frames: 0,
            shots: 0,
        }
    }

    pub fn fire(&mut self, source: &dyn PoseSource) -> Result<(), PumpError> {
        let pose = source.local_pose();
        self.pump.send_fire_event(pose.position, pose.rotation)?;
        self.shots += 1;
        Ok(())
    }

    /// Advances one frame, firing when the interval elapses. Returns whether
    /// a shot was sent.
    pub fn tick(&mut self, source: &dyn PoseSource) -> bool {
        if self.every == 0 {
            return false;
        }

        self.frames += 1;
        if self.frames < self.every {
            return false;
        }
        self.frames = 0;

        match self.fire(source) {
            Ok(()) => true,
            Err(e) => {
                debug!("Shot not sent: {}", e);
                false
            }
        }
    }

    pub fn shots(&self) -> u32 {
        self.shots
    }
}
