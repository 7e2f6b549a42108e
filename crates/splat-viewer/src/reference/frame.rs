//! Stage-by-stage model of the GPU state a frame touches.

use super::project::{preprocess, ProjectedSplat};
use super::radix::sort_pairs;
use crate::data::types::{
    CameraUniform, DrawIndirectArgs, GaussianPrimitive, RenderSettings, ShCoefficients,
};
use crate::renderer::pipelines::radix_sort::num_blocks;
use crate::renderer::{DepthOrder, FrameStage};

/// Holds the same counters and arrays as the renderer's buffers, sized for
/// the cloud, and applies each [`FrameStage`] to them.
pub struct FrameSimulator {
    primitives: Vec<GaussianPrimitive>,
    sh: Vec<ShCoefficients>,
    order: DepthOrder,
    pub camera: CameraUniform,
    pub settings: RenderSettings,

    /// `SortInfo.keys_size`
    pub visible_count: u32,
    /// `x` of the sort's indirect dispatch.
    pub dispatch_x: u32,
    pub keys: Vec<u32>,
    pub values: Vec<u32>,
    pub splats: Vec<Option<ProjectedSplat>>,
    pub indirect: DrawIndirectArgs,
    /// Splat slots issued by the last render, in draw order.
    pub drawn: Vec<u32>,
}

impl FrameSimulator {
    pub fn new(
        primitives: Vec<GaussianPrimitive>,
        sh: Vec<ShCoefficients>,
        camera: CameraUniform,
        settings: RenderSettings,
        order: DepthOrder,
    ) -> Self {
        let n = primitives.len();
        Self {
            primitives,
            sh,
            order,
            camera,
            settings,
            visible_count: 0,
            dispatch_x: 0,
            keys: vec![0; n],
            values: vec![0; n],
            splats: vec![None; n],
            indirect: DrawIndirectArgs::quads(),
            drawn: Vec::new(),
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.primitives.len()
    }

    pub fn run_stage(&mut self, stage: FrameStage) {
        match stage {
            FrameStage::Reset => {
                self.visible_count = 0;
                self.dispatch_x = 0;
            }
            FrameStage::Preprocess => {
                // Slots continue from whatever the counter holds.
                let base = self.visible_count;
                let out = preprocess(
                    &self.primitives,
                    &self.sh,
                    &self.camera,
                    &self.settings,
                    self.order,
                );
                for (i, splat) in out.splats.iter().enumerate() {
                    let slot = (base + i as u32) as usize;
                    if slot < self.capacity() {
                        self.splats[slot] = Some(*splat);
                        self.keys[slot] = out.keys[i];
                        self.values[slot] = slot as u32;
                    }
                }
                self.visible_count = base + out.count();
            }
            FrameStage::Sort => {
                self.dispatch_x = num_blocks(self.visible_count);
                let n = (self.visible_count as usize).min(self.capacity());
                let (keys, values) = sort_pairs(&self.keys[..n], &self.values[..n]);
                self.keys[..n].copy_from_slice(&keys);
                self.values[..n].copy_from_slice(&values);
            }
            FrameStage::FixupIndirectCount => {
                self.indirect.instance_count = self.visible_count;
            }
            FrameStage::Render => {
                let n = (self.indirect.instance_count as usize).min(self.capacity());
                self.drawn = self.values[..n].to_vec();
            }
        }
    }

    pub fn frame(&mut self) {
        for stage in FrameStage::SEQUENCE {
            self.run_stage(stage);
        }
    }

    /// Splats in the order the last render drew them.
    pub fn drawn_splats(&self) -> Vec<ProjectedSplat> {
        self.drawn
            .iter()
            .filter_map(|&slot| self.splats[slot as usize])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::project::dc_for_color;
    use glam::{Mat4, Vec2, Vec3};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn camera_at(eye: Vec3) -> CameraUniform {
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        CameraUniform::new(view, proj, Vec2::splat(64.0))
    }

    fn primitive(position: Vec3) -> GaussianPrimitive {
        GaussianPrimitive {
            position: position.into(),
            opacity: 10.0,
            rotation: [1.0, 0.0, 0.0, 0.0],
            scale: [0.1f32.ln(); 3],
            _pad: 0.0,
        }
    }

    fn simulator(positions: &[Vec3], order: DepthOrder) -> FrameSimulator {
        let prims: Vec<_> = positions.iter().map(|&p| primitive(p)).collect();
        let mut sh = ShCoefficients::default();
        sh.coeffs[0] = dc_for_color(Vec3::ONE);
        FrameSimulator::new(
            prims,
            vec![sh; positions.len()],
            camera_at(Vec3::new(0.0, 0.0, 5.0)),
            RenderSettings::new(1.0, 0),
            order,
        )
    }

    #[test]
    fn depths_follow_configured_order() {
        // Depths 1, 5, 10 created in reverse.
        let positions = [
            Vec3::new(0.0, 0.0, -5.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
        ];

        let mut back_to_front = simulator(&positions, DepthOrder::BackToFront);
        back_to_front.frame();
        let depths: Vec<f32> = back_to_front.drawn_splats().iter().map(|s| s.depth).collect();
        assert_eq!(depths.len(), 3);
        assert!(depths.windows(2).all(|w| w[0] > w[1]), "{:?}", depths);

        let mut front_to_back = simulator(&positions, DepthOrder::FrontToBack);
        front_to_back.frame();
        let depths: Vec<f32> = front_to_back.drawn_splats().iter().map(|s| s.depth).collect();
        assert!(depths.windows(2).all(|w| w[0] < w[1]), "{:?}", depths);
    }

    #[test]
    fn count_matches_visible_set() {
        let mut rng = StdRng::seed_from_u64(3);
        let positions: Vec<Vec3> = (0..600)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(-8.0..8.0),
                    rng.gen_range(-8.0..8.0),
                    rng.gen_range(-10.0..8.0),
                )
            })
            .collect();
        let mut sim = simulator(&positions, DepthOrder::BackToFront);
        sim.frame();

        let expected = crate::reference::preprocess(
            &sim.primitives,
            &sim.sh,
            &sim.camera,
            &sim.settings,
            DepthOrder::BackToFront,
        );
        assert_eq!(sim.visible_count, expected.count());
        assert!(sim.visible_count > 0 && (sim.visible_count as usize) < positions.len());
        assert_eq!(sim.indirect.instance_count, sim.visible_count);
        assert_eq!(sim.dispatch_x, num_blocks(sim.visible_count));

        let mut drawn = sim.drawn.clone();
        drawn.sort_unstable();
        assert_eq!(drawn, (0..sim.visible_count).collect::<Vec<_>>());

        let n = sim.visible_count as usize;
        assert!(sim.keys[..n].windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn double_reset_leaves_zero_count() {
        let mut sim = simulator(&[Vec3::ZERO, Vec3::X], DepthOrder::BackToFront);
        sim.frame();
        assert_eq!(sim.visible_count, 2);

        sim.run_stage(FrameStage::Reset);
        sim.run_stage(FrameStage::Reset);
        assert_eq!(sim.visible_count, 0);
        assert_eq!(sim.dispatch_x, 0);

        // The next frame counts from zero again.
        sim.frame();
        assert_eq!(sim.visible_count, 2);
    }

    #[test]
    fn fixup_uses_latest_count() {
        let mut sim = simulator(&[Vec3::ZERO, Vec3::new(0.0, 0.0, -3.0)], DepthOrder::BackToFront);
        sim.frame();
        assert_eq!(sim.indirect.instance_count, 2);

        // Turn around: both primitives end up behind the camera.
        sim.camera = {
            let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, 10.0), Vec3::Y);
            CameraUniform::new(view, sim.camera.proj(), Vec2::splat(64.0))
        };
        sim.frame();
        assert_eq!(sim.visible_count, 0);
        assert_eq!(sim.indirect.instance_count, 0);
        assert!(sim.drawn.is_empty());
    }

    #[test]
    fn empty_cloud_is_a_no_op_frame() {
        let mut sim = simulator(&[], DepthOrder::BackToFront);
        sim.frame();
        assert_eq!(sim.visible_count, 0);
        assert_eq!(sim.dispatch_x, 0);
        assert_eq!(sim.indirect, DrawIndirectArgs::quads());
        assert!(sim.drawn.is_empty());
    }
}
