// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The inter-tile mesh: topology, routing and the router fabric.

pub mod fabric;

pub use fabric::{MeshConfig, MeshEndpoint, MeshFabric, MeshPacket, MESH_PACKET_BYTES};

/// One port of a mesh router.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MeshPort {
    /// The endpoint attached to this router.
    Local,
    /// Towards larger `y`.
    North,
    /// Towards smaller `y`.
    South,
    /// Towards larger `x`.
    East,
    /// Towards smaller `x`.
    West,
}

impl MeshPort {
    /// All ports, `Local` first.
    pub const ALL: [MeshPort; 5] = [
        MeshPort::Local,
        MeshPort::North,
        MeshPort::South,
        MeshPort::East,
        MeshPort::West,
    ];

    /// A stable index for per-port arrays.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            MeshPort::Local => 0,
            MeshPort::North => 1,
            MeshPort::South => 2,
            MeshPort::East => 3,
            MeshPort::West => 4,
        }
    }

    /// The port a packet leaving through `self` arrives on.
    #[must_use]
    pub fn opposite(self) -> MeshPort {
        match self {
            MeshPort::Local => MeshPort::Local,
            MeshPort::North => MeshPort::South,
            MeshPort::South => MeshPort::North,
            MeshPort::East => MeshPort::West,
            MeshPort::West => MeshPort::East,
        }
    }
}

/// The grid the tiles are arranged on. Node `id = y*width + x`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Topology {
    /// A flat 2-D mesh with edges.
    Mesh2D {
        /// Columns.
        width: usize,
        /// Rows.
        height: usize,
    },
    /// A 2-D torus wrapping both dimensions.
    Torus2D {
        /// Columns.
        width: usize,
        /// Rows.
        height: usize,
    },
}

impl Topology {
    /// Grid width.
    #[must_use]
    pub fn width(&self) -> usize {
        match *self {
            Topology::Mesh2D { width, .. } | Topology::Torus2D { width, .. } => width,
        }
    }

    /// Grid height.
    #[must_use]
    pub fn height(&self) -> usize {
        match *self {
            Topology::Mesh2D { height, .. } | Topology::Torus2D { height, .. } => height,
        }
    }

    /// Number of tiles on the grid.
    #[must_use]
    pub fn num_tiles(&self) -> usize {
        self.width() * self.height()
    }

    /// The `(x, y)` coordinates of a node id.
    #[must_use]
    pub fn coords(&self, id: usize) -> (usize, usize) {
        (id % self.width(), id / self.width())
    }

    /// The node id at `(x, y)`.
    #[must_use]
    pub fn id_of(&self, x: usize, y: usize) -> usize {
        y * self.width() + x
    }

    /// Minimal hop count between two nodes.
    #[must_use]
    pub fn hop_distance(&self, src: usize, dst: usize) -> usize {
        let (sx, sy) = self.coords(src);
        let (dx, dy) = self.coords(dst);
        match *self {
            Topology::Mesh2D { .. } => sx.abs_diff(dx) + sy.abs_diff(dy),
            Topology::Torus2D { width, height } => {
                let ddx = sx.abs_diff(dx);
                let ddy = sy.abs_diff(dy);
                ddx.min(width - ddx) + ddy.min(height - ddy)
            }
        }
    }

    /// The deterministic routing decision at `current` for a packet headed
    /// to `dst`: dimension-ordered (X before Y), minimal wrap on the torus.
    #[must_use]
    pub fn route(&self, current: usize, dst: usize) -> MeshPort {
        let (cx, cy) = self.coords(current);
        let (dx, dy) = self.coords(dst);
        match *self {
            Topology::Mesh2D { .. } => {
                if dx < cx {
                    MeshPort::West
                } else if dx > cx {
                    MeshPort::East
                } else if dy < cy {
                    MeshPort::South
                } else if dy > cy {
                    MeshPort::North
                } else {
                    MeshPort::Local
                }
            }
            Topology::Torus2D { width, height } => {
                if cx != dx {
                    // Ties between the two ways around go east.
                    let east = (dx + width - cx) % width;
                    let west = (cx + width - dx) % width;
                    if east <= west {
                        MeshPort::East
                    } else {
                        MeshPort::West
                    }
                } else if cy != dy {
                    let north = (dy + height - cy) % height;
                    let south = (cy + height - dy) % height;
                    if north <= south {
                        MeshPort::North
                    } else {
                        MeshPort::South
                    }
                } else {
                    MeshPort::Local
                }
            }
        }
    }

    /// The neighbour reached through `port`, if there is one.
    #[must_use]
    pub fn neighbor(&self, id: usize, port: MeshPort) -> Option<usize> {
        let (x, y) = self.coords(id);
        let (width, height) = (self.width(), self.height());
        match *self {
            Topology::Mesh2D { .. } => match port {
                MeshPort::Local => Some(id),
                MeshPort::North => (y + 1 < height).then(|| self.id_of(x, y + 1)),
                MeshPort::South => (y > 0).then(|| self.id_of(x, y - 1)),
                MeshPort::East => (x + 1 < width).then(|| self.id_of(x + 1, y)),
                MeshPort::West => (x > 0).then(|| self.id_of(x - 1, y)),
            },
            Topology::Torus2D { .. } => Some(match port {
                MeshPort::Local => id,
                MeshPort::North => self.id_of(x, (y + 1) % height),
                MeshPort::South => self.id_of(x, (y + height - 1) % height),
                MeshPort::East => self.id_of((x + 1) % width, y),
                MeshPort::West => self.id_of((x + width - 1) % width, y),
            }),
        }
    }

    /// True when taking `port` from `id` crosses the wrap-around edge.
    /// Packets crossing the dateline switch virtual channel to stay
    /// deadlock free.
    #[must_use]
    pub fn is_wrap_hop(&self, id: usize, port: MeshPort) -> bool {
        if let Topology::Mesh2D { .. } = self {
            return false;
        }
        let (x, y) = self.coords(id);
        match port {
            MeshPort::Local => false,
            MeshPort::North => y + 1 == self.height(),
            MeshPort::South => y == 0,
            MeshPort::East => x + 1 == self.width(),
            MeshPort::West => x == 0,
        }
    }

    /// Ports that reduce the hop distance to `dst`.
    #[must_use]
    pub fn productive_ports(&self, current: usize, dst: usize) -> Vec<MeshPort> {
        let here = self.hop_distance(current, dst);
        MeshPort::ALL
            .into_iter()
            .filter(|port| *port != MeshPort::Local)
            .filter(|port| {
                self.neighbor(current, *port)
                    .is_some_and(|next| self.hop_distance(next, dst) < here)
            })
            .collect()
    }
}
