//! Animation clips and keyframe sampling.

use cgmath::{InnerSpace, Quaternion, Vector3, VectorSpace};

use crate::data_structures::instance::Instance;

#[derive(Clone, Debug)]
pub enum Keyframes {
    Translation(Vec<cgmath::Vector3<f32>>),
    Rotation(Vec<cgmath::Quaternion<f32>>),
    Scale(Vec<cgmath::Vector3<f32>>),
    Other,
}

/// Keyframes for one property of one named node. Timestamps are in seconds.
#[derive(Clone, Debug)]
pub struct Track {
    pub target: String,
    pub keyframes: Keyframes,
    pub timestamps: Vec<f32>,
}

/// A single sampled property value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample {
    Translation(Vector3<f32>),
    Rotation(Quaternion<f32>),
    Scale(Vector3<f32>),
}

impl Sample {
    pub fn apply(&self, instance: &mut Instance) {
        match *self {
            Sample::Translation(position) => instance.position = position,
            Sample::Rotation(rotation) => instance.rotation = rotation,
            Sample::Scale(scale) => instance.scale = scale,
        }
    }
}

/// Returns the keyframe pair around `t` and the blend factor between them.
fn segment(timestamps: &[f32], t: f32) -> Option<(usize, usize, f32)> {
    let last = timestamps.len().checked_sub(1)?;
    if t <= timestamps[0] {
        return Some((0, 0, 0.0));
    }
    if t >= timestamps[last] {
        return Some((last, last, 0.0));
    }
    let next = timestamps.partition_point(|&stamp| stamp <= t);
    let prev = next - 1;
    let span = timestamps[next] - timestamps[prev];
    let factor = if span > 0.0 {
        (t - timestamps[prev]) / span
    } else {
        0.0
    };
    Some((prev, next, factor))
}

impl Track {
    /// Samples the track at `t` seconds, holding the first/last key outside the range.
    pub fn sample(&self, t: f32) -> Option<Sample> {
        let (prev, next, factor) = segment(&self.timestamps, t)?;
        match &self.keyframes {
            Keyframes::Translation(values) => Some(Sample::Translation(
                values.get(prev)?.lerp(*values.get(next)?, factor),
            )),
            Keyframes::Scale(values) => Some(Sample::Scale(
                values.get(prev)?.lerp(*values.get(next)?, factor),
            )),
            Keyframes::Rotation(values) => {
                let a = *values.get(prev)?;
                let mut b = *values.get(next)?;
                // take the short way around
                if a.dot(b) < 0.0 {
                    b = -b;
                }
                Some(Sample::Rotation(a.slerp(b, factor).normalize()))
            }
            Keyframes::Other => None,
        }
    }

    pub fn duration(&self) -> f32 {
        self.timestamps.last().copied().unwrap_or(0.0)
    }
}

/// A named animation: a set of tracks played together.
#[derive(Clone, Debug)]
pub struct AnimationClip {
    pub name: String,
    pub tracks: Vec<Track>,
    duration: f32,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, tracks: Vec<Track>) -> Self {
        let duration = tracks.iter().map(Track::duration).fold(0.0, f32::max);
        Self {
            name: name.into(),
            tracks,
            duration,
        }
    }

    /// Duration in seconds (the latest keyframe of any track).
    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration as f64 * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{Deg, Rotation3};

    use super::*;

    fn wave() -> AnimationClip {
        AnimationClip::new(
            "wave",
            vec![
                Track {
                    target: "hand".to_string(),
                    keyframes: Keyframes::Translation(vec![
                        Vector3::new(0.0, 0.0, 0.0),
                        Vector3::new(2.0, 0.0, 0.0),
                    ]),
                    timestamps: vec![0.0, 2.0],
                },
                Track {
                    target: "hand".to_string(),
                    keyframes: Keyframes::Rotation(vec![
                        Quaternion::from_angle_z(Deg(0.0)),
                        Quaternion::from_angle_z(Deg(90.0)),
                    ]),
                    timestamps: vec![0.0, 1.0],
                },
            ],
        )
    }

    #[test]
    fn duration_is_latest_keyframe() {
        let clip = wave();
        assert_eq!(clip.duration(), 2.0);
        assert_eq!(clip.duration_ms(), 2000.0);
    }

    #[test]
    fn translation_is_interpolated_and_held() {
        let clip = wave();
        let track = &clip.tracks[0];
        assert_eq!(
            track.sample(0.5),
            Some(Sample::Translation(Vector3::new(0.5, 0.0, 0.0)))
        );
        assert_eq!(
            track.sample(5.0),
            Some(Sample::Translation(Vector3::new(2.0, 0.0, 0.0)))
        );
        assert_eq!(
            track.sample(-1.0),
            Some(Sample::Translation(Vector3::new(0.0, 0.0, 0.0)))
        );
    }

    #[test]
    fn rotation_is_slerped() {
        let clip = wave();
        let Some(Sample::Rotation(q)) = clip.tracks[1].sample(0.5) else {
            panic!("expected a rotation sample");
        };
        let expected = Quaternion::from_angle_z(Deg(45.0));
        assert!((q.dot(expected).abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_track_has_no_sample() {
        let track = Track {
            target: "x".to_string(),
            keyframes: Keyframes::Scale(Vec::new()),
            timestamps: Vec::new(),
        };
        assert_eq!(track.sample(0.0), None);
    }
}
