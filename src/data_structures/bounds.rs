//! Oriented bounding boxes anchored to an entity.

use cgmath::{EuclideanSpace, Point3, Quaternion, Vector3};

use crate::data_structures::{instance::Instance, mesh_group::Aabb};

/**
 * Bounding volume of a loaded mesh.
 *
 * The extent is kept in the entity's local space so later entity transforms only
 * need [`OrientedBox::pose`] to place it, never a walk over the mesh again.
 * `world_center` is the center as it was when the box was computed.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct OrientedBox {
    pub size: Vector3<f32>,
    pub local_center: Point3<f32>,
    pub world_center: Point3<f32>,
}

/// World placement of an [`OrientedBox`].
#[derive(Clone, Debug, PartialEq)]
pub struct BoxPose {
    pub center: Point3<f32>,
    pub rotation: Quaternion<f32>,
    pub size: Vector3<f32>,
}

impl OrientedBox {
    pub fn zero() -> Self {
        Self {
            size: Vector3::new(0.0, 0.0, 0.0),
            local_center: Point3::origin(),
            world_center: Point3::origin(),
        }
    }

    pub fn from_extent(extent: &Aabb, entity_world: &Instance) -> Self {
        let local_center = extent.center();
        Self {
            size: extent.size(),
            local_center,
            world_center: entity_world.transform_point(local_center),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.size == Vector3::new(0.0, 0.0, 0.0)
    }

    pub fn pose(&self, entity_world: &Instance) -> BoxPose {
        BoxPose {
            center: entity_world.transform_point(self.local_center),
            rotation: entity_world.rotation,
            size: Vector3::new(
                self.size.x * entity_world.scale.x.abs(),
                self.size.y * entity_world.scale.y.abs(),
                self.size.z * entity_world.scale.z.abs(),
            ),
        }
    }
}

impl Default for OrientedBox {
    fn default() -> Self {
        Self::zero()
    }
}
