//! The minimal component vocabulary this repo's demo gameplay glue needs to exercise the
//! network core end to end. Real demographic/employment/terrain components live in the
//! simulation this core treats as an external collaborator (section 1); these two are just
//! enough for `handlers::build_input_handler` to have something to create, mutate and
//! replicate.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use corenet::shared::NetworkResult;
use netcore::net::buffer::ByteBuffer;
use netcore::net::types::GridPosition;
use registry::{Component, ComponentId};

/// A placed building: its tile and a gameplay-defined kind byte (residential, commercial,
/// ...). `param1` of the originating `Input` carries the kind.
#[derive(Debug, Clone, Copy)]
pub struct Building {
    pub position: GridPosition,
    pub kind: u8,
}

impl Component for Building {
    const ID: ComponentId = 0;

    fn encode(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        self.position.write(out)?;
        out.write_u8(self.kind)?;
        Ok(())
    }

    fn decode(buf: &mut ByteBuffer) -> NetworkResult<Building> {
        Ok(Building {
            position: GridPosition::read(buf)?,
            kind: buf.read_u8()?,
        })
    }
}

/// A zoned tile: the zoning category byte `ZoneTiles`/`UnzoneTiles` carries in `param1`.
#[derive(Debug, Clone, Copy)]
pub struct Zone {
    pub position: GridPosition,
    pub category: u8,
}

impl Component for Zone {
    const ID: ComponentId = 1;

    fn encode(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        self.position.write(out)?;
        out.write_u8(self.category)?;
        Ok(())
    }

    fn decode(buf: &mut ByteBuffer) -> NetworkResult<Zone> {
        Ok(Zone {
            position: GridPosition::read(buf)?,
            category: buf.read_u8()?,
        })
    }
}

/// Per-tile infrastructure (roads, power, water): `param1` carries the kind byte, identical
/// shape to `Building` but a distinct wire type so the client can tell them apart.
#[derive(Debug, Clone, Copy)]
pub struct Infrastructure {
    pub position: GridPosition,
    pub kind: u8,
}

impl Component for Infrastructure {
    const ID: ComponentId = 2;

    fn encode(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        self.position.write(out)?;
        out.write_u8(self.kind)?;
        Ok(())
    }

    fn decode(buf: &mut ByteBuffer) -> NetworkResult<Infrastructure> {
        Ok(Infrastructure {
            position: GridPosition::read(buf)?,
            kind: buf.read_u8()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_building_round_trips_through_buffer() {
        let mut buf = ByteBuffer::new();
        let building = Building { position: GridPosition { x: 4, y: -2 }, kind: 3 };
        building.encode(&mut buf).unwrap();

        let mut read_buf = ByteBuffer::from_vec(buf.data().to_vec());
        let decoded = Building::decode(&mut read_buf).unwrap();
        assert_eq!(decoded.position, building.position);
        assert_eq!(decoded.kind, building.kind);
    }
}
