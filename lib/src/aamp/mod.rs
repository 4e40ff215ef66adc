//! AAMP parameter archives (version 2).

use binrw::prelude::*;
use binrw::Endian;
use bitflags::bitflags;
use tracing::debug;

use crate::binary::{Reader, Writer};
use crate::hash::resource_hash;
use crate::{Error, Result};

pub mod names;
pub mod text;

pub use names::AampNames;

/// Hash of the root list name, `param_root`.
pub const ROOT_KEY: u32 = 0xA4F6_CB6C;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        const LITTLE_ENDIAN = 1 << 0;
        const UTF8 = 1 << 1;
    }
}

#[binrw]
#[brw(magic = b"AAMP")]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Header {
    version: u32,
    flags: u32,
    file_size: u32,
    pio_version: u32,
    /// Offset of the root list, relative to the end of this header.
    pio_offset: u32,
    list_count: u32,
    object_count: u32,
    param_count: u32,
    data_section_size: u32,
    string_section_size: u32,
    unknown_section_size: u32,
}

const HEADER_SIZE: u64 = 0x30;

#[binrw]
#[derive(Debug, Default, Clone, Copy)]
struct ResList {
    name: u32,
    lists_offset: u16,
    list_count: u16,
    objects_offset: u16,
    object_count: u16,
}

#[binrw]
#[derive(Debug, Default, Clone, Copy)]
struct ResObject {
    name: u32,
    params_offset: u16,
    param_count: u16,
}

#[binrw]
#[derive(Debug, Default, Clone, Copy)]
struct ResParameter {
    name: u32,
    /// Low 24 bits: data offset in words from this entry. High 8 bits: type.
    data: u32,
}

/// One animation curve: two integer header words and 30 floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Curve {
    pub a: u32,
    pub b: u32,
    pub floats: [f32; 30],
}

impl Default for Curve {
    fn default() -> Self {
        Self {
            a: 0,
            b: 0,
            floats: [0.0; 30],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Bool(bool),
    F32(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Color([f32; 4]),
    String32(String),
    String64(String),
    /// One to four curves; the count selects the stored type.
    Curve(Vec<Curve>),
    BufferInt(Vec<i32>),
    BufferF32(Vec<f32>),
    String256(String),
    Quat([f32; 4]),
    U32(u32),
    BufferU32(Vec<u32>),
    BufferBinary(Vec<u8>),
    StringRef(String),
}

/// Bytes a fixed-width string type holds, terminator included.
pub(crate) fn string_capacity(type_id: u8) -> Option<usize> {
    match type_id {
        7 => Some(32),
        8 => Some(64),
        15 => Some(256),
        _ => None,
    }
}

fn fixed_string(s: &str, field: &'static str, type_id: u8) -> Result<u8> {
    match string_capacity(type_id) {
        Some(capacity) if s.len() >= capacity => Err(Error::ValueOutOfRange {
            field,
            value: s.len() as u64,
        }),
        _ => Ok(type_id),
    }
}

impl Parameter {
    fn type_id(&self) -> Result<u8> {
        Ok(match self {
            Parameter::Bool(_) => 0,
            Parameter::F32(_) => 1,
            Parameter::Int(_) => 2,
            Parameter::Vec2(_) => 3,
            Parameter::Vec3(_) => 4,
            Parameter::Vec4(_) => 5,
            Parameter::Color(_) => 6,
            Parameter::String32(s) => fixed_string(s, "AAMP string32", 7)?,
            Parameter::String64(s) => fixed_string(s, "AAMP string64", 8)?,
            Parameter::Curve(curves) => match curves.len() {
                1..=4 => 8 + curves.len() as u8,
                n => {
                    return Err(Error::ValueOutOfRange {
                        field: "curve count",
                        value: n as u64,
                    })
                }
            },
            Parameter::BufferInt(_) => 13,
            Parameter::BufferF32(_) => 14,
            Parameter::String256(s) => fixed_string(s, "AAMP string256", 15)?,
            Parameter::Quat(_) => 16,
            Parameter::U32(_) => 17,
            Parameter::BufferU32(_) => 18,
            Parameter::BufferBinary(_) => 19,
            Parameter::StringRef(_) => 20,
        })
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Parameter::String32(s)
            | Parameter::String64(s)
            | Parameter::String256(s)
            | Parameter::StringRef(s) => Some(s),
            _ => None,
        }
    }

    fn buffer_len(&self) -> Option<usize> {
        match self {
            Parameter::BufferInt(v) => Some(v.len()),
            Parameter::BufferF32(v) => Some(v.len()),
            Parameter::BufferU32(v) => Some(v.len()),
            Parameter::BufferBinary(v) => Some(v.len()),
            _ => None,
        }
    }
}

/// A named set of parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterObject(pub Vec<(u32, Parameter)>);

impl ParameterObject {
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        let hash = resource_hash(name);
        self.0.iter().find(|(k, _)| *k == hash).map(|(_, p)| p)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterList {
    pub objects: Vec<(u32, ParameterObject)>,
    pub lists: Vec<(u32, ParameterList)>,
}

impl ParameterList {
    pub fn object(&self, name: &str) -> Option<&ParameterObject> {
        let hash = resource_hash(name);
        self.objects.iter().find(|(k, _)| *k == hash).map(|(_, o)| o)
    }

    pub fn list(&self, name: &str) -> Option<&ParameterList> {
        let hash = resource_hash(name);
        self.lists.iter().find(|(k, _)| *k == hash).map(|(_, l)| l)
    }
}

/// A whole parameter archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterIO {
    pub version: u32,
    pub data_type: String,
    pub root: ParameterList,
}

impl Default for ParameterIO {
    fn default() -> Self {
        Self {
            version: 0,
            data_type: "xml".to_string(),
            root: ParameterList::default(),
        }
    }
}

fn read_floats<const N: usize>(reader: &mut Reader) -> Result<[f32; N]> {
    let mut out = [0f32; N];
    for value in &mut out {
        *value = reader.f32()?;
    }
    Ok(out)
}

fn read_parameter(reader: &mut Reader, pos: u64, type_id: u8) -> Result<Parameter> {
    // Buffers are prefixed by their element count.
    let buffer_len = |reader: &mut Reader| -> Result<usize> {
        reader.seek_task(pos.saturating_sub(4), |r| r.u32()).map(|n| n as usize)
    };
    reader.seek_task(pos, |reader| {
        Ok(match type_id {
            0 => Parameter::Bool(reader.u32()? != 0),
            1 => Parameter::F32(reader.f32()?),
            2 => Parameter::Int(reader.i32()?),
            3 => Parameter::Vec2(read_floats(reader)?),
            4 => Parameter::Vec3(read_floats(reader)?),
            5 => Parameter::Vec4(read_floats(reader)?),
            6 => Parameter::Color(read_floats(reader)?),
            7 => Parameter::String32(reader.null_string()?),
            8 => Parameter::String64(reader.null_string()?),
            9..=12 => {
                let mut curves = vec![];
                for _ in 0..(type_id - 8) {
                    curves.push(Curve {
                        a: reader.u32()?,
                        b: reader.u32()?,
                        floats: read_floats(reader)?,
                    });
                }
                Parameter::Curve(curves)
            }
            13 => {
                let len = buffer_len(reader)?;
                Parameter::BufferInt((0..len).map(|_| reader.i32()).collect::<Result<_>>()?)
            }
            14 => {
                let len = buffer_len(reader)?;
                Parameter::BufferF32((0..len).map(|_| reader.f32()).collect::<Result<_>>()?)
            }
            15 => Parameter::String256(reader.null_string()?),
            16 => Parameter::Quat(read_floats(reader)?),
            17 => Parameter::U32(reader.u32()?),
            18 => {
                let len = buffer_len(reader)?;
                Parameter::BufferU32((0..len).map(|_| reader.u32()).collect::<Result<_>>()?)
            }
            19 => {
                let len = buffer_len(reader)?;
                Parameter::BufferBinary(reader.bytes(len)?.to_vec())
            }
            20 => Parameter::StringRef(reader.null_string()?),
            other => {
                return Err(Error::invalid("AAMP", format!("unknown parameter type {other}")))
            }
        })
    })
}

fn read_object(reader: &mut Reader, pos: u64) -> Result<ParameterObject> {
    let res: ResObject = reader.seek_task(pos, |r| r.read())?;
    let start = pos + res.params_offset as u64 * 4;
    let mut params = Vec::with_capacity(res.param_count as usize);
    for i in 0..res.param_count as u64 {
        let entry_pos = start + i * 8;
        let entry: ResParameter = reader.seek_task(entry_pos, |r| r.read())?;
        let data_pos = entry_pos + (entry.data & 0x00FF_FFFF) as u64 * 4;
        let param = read_parameter(reader, data_pos, (entry.data >> 24) as u8)?;
        params.push((entry.name, param));
    }
    Ok(ParameterObject(params))
}

fn read_list(reader: &mut Reader, pos: u64, depth: usize) -> Result<(u32, ParameterList)> {
    if depth > 64 {
        return Err(Error::invalid("AAMP", "lists nested too deeply"));
    }
    let res: ResList = reader.seek_task(pos, |r| r.read())?;
    let mut list = ParameterList::default();
    let lists_start = pos + res.lists_offset as u64 * 4;
    for i in 0..res.list_count as u64 {
        list.lists.push(read_list(reader, lists_start + i * 12, depth + 1)?);
    }
    let objects_start = pos + res.objects_offset as u64 * 4;
    for i in 0..res.object_count as u64 {
        let child_pos = objects_start + i * 8;
        let name: u32 = reader.seek_task(child_pos, |r| r.u32())?;
        list.objects.push((name, read_object(reader, child_pos)?));
    }
    Ok((res.name, list))
}

impl ParameterIO {
    pub fn read(data: &[u8]) -> Result<Self> {
        Self::read_raw(data).map_err(|e| e.into_format("AAMP"))
    }

    /// Byte order of an AAMP buffer. The version field is 2 in the right order.
    pub fn detect_endian(data: &[u8]) -> Result<Endian> {
        if !data.starts_with(b"AAMP") || data.len() < HEADER_SIZE as usize {
            return Err(Error::invalid("AAMP", "bad magic"));
        }
        match data[4..8] {
            [2, 0, 0, 0] => Ok(Endian::Little),
            [0, 0, 0, 2] => Ok(Endian::Big),
            _ => Err(Error::invalid("AAMP", "only version 2 is supported")),
        }
    }

    fn read_raw(data: &[u8]) -> Result<Self> {
        let endian = Self::detect_endian(data)?;
        let mut reader = Reader::new(data, endian);
        let header: Header = reader.read()?;
        let flags = HeaderFlags::from_bits_retain(header.flags);
        if !flags.contains(HeaderFlags::UTF8) {
            return Err(Error::invalid("AAMP", "only UTF-8 archives are supported"));
        }
        let data_type = reader.null_string()?;
        let (name, root) = read_list(&mut reader, HEADER_SIZE + header.pio_offset as u64, 0)?;
        if name != ROOT_KEY {
            return Err(Error::invalid("AAMP", "root list is not param_root"));
        }
        debug!(
            lists = header.list_count,
            objects = header.object_count,
            params = header.param_count,
            "decoded AAMP"
        );
        Ok(Self {
            version: header.pio_version,
            data_type,
            root,
        })
    }

    pub fn to_binary(&self, endian: Endian) -> Result<Vec<u8>> {
        // Breadth first, so each list's children are contiguous.
        let mut lists: Vec<(u32, &ParameterList)> = vec![(ROOT_KEY, &self.root)];
        let mut i = 0;
        while i < lists.len() {
            let list = lists[i].1;
            lists.extend(list.lists.iter().map(|(k, l)| (*k, l)));
            i += 1;
        }
        let objects: Vec<(u32, &ParameterObject)> = lists
            .iter()
            .flat_map(|(_, l)| l.objects.iter().map(|(k, o)| (*k, o)))
            .collect();
        let params: Vec<(u32, &Parameter)> = objects
            .iter()
            .flat_map(|(_, o)| o.0.iter().map(|(k, p)| (*k, p)))
            .collect();

        let type_len = (self.data_type.len() as u64 + 1).next_multiple_of(4);
        let lists_start = HEADER_SIZE + type_len;
        let objects_start = lists_start + 12 * lists.len() as u64;
        let params_start = objects_start + 8 * objects.len() as u64;
        let data_start = params_start + 8 * params.len() as u64;

        let offset16 = |from: u64, to: u64| -> Result<u16> {
            u16::try_from((to - from) / 4).map_err(|_| Error::ValueOutOfRange {
                field: "AAMP child offset",
                value: to - from,
            })
        };

        let mut writer = Writer::new(endian);
        writer.write(&Header::default())?;
        writer.null_string(&self.data_type)?;
        writer.align(4)?;

        let mut next_list = 1u64;
        let mut next_object = 0u64;
        for (idx, (name, list)) in lists.iter().enumerate() {
            let pos = lists_start + 12 * idx as u64;
            let child_lists = lists_start + 12 * next_list;
            let child_objects = objects_start + 8 * next_object;
            writer.write(&ResList {
                name: *name,
                lists_offset: offset16(pos, child_lists)?,
                list_count: list.lists.len() as u16,
                objects_offset: offset16(pos, child_objects)?,
                object_count: list.objects.len() as u16,
            })?;
            next_list += list.lists.len() as u64;
            next_object += list.objects.len() as u64;
        }
        let mut next_param = 0u64;
        for (idx, (name, object)) in objects.iter().enumerate() {
            let pos = objects_start + 8 * idx as u64;
            writer.write(&ResObject {
                name: *name,
                params_offset: offset16(pos, params_start + 8 * next_param)?,
                param_count: object.0.len() as u16,
            })?;
            next_param += object.0.len() as u64;
        }
        for (name, param) in &params {
            writer.write(&ResParameter {
                name: *name,
                data: (param.type_id()? as u32) << 24,
            })?;
        }

        let patch = |writer: &mut Writer, idx: usize, type_id: u8, data_pos: u64| -> Result<()> {
            let entry_pos = params_start + 8 * idx as u64;
            let words = (data_pos - entry_pos) / 4;
            if words > 0x00FF_FFFF {
                return Err(Error::ValueOutOfRange {
                    field: "AAMP data offset",
                    value: words,
                });
            }
            writer.write_at(entry_pos + 4, &((type_id as u32) << 24 | words as u32))
        };

        for (idx, (_, param)) in params.iter().enumerate() {
            if param.as_str().is_some() {
                continue;
            }
            writer.align(4)?;
            if let Some(len) = param.buffer_len() {
                writer.u32(len as u32)?;
            }
            let pos = writer.position();
            patch(&mut writer, idx, param.type_id()?, pos)?;
            write_value(&mut writer, param)?;
        }
        writer.align(4)?;
        let string_start = writer.position();
        for (idx, (_, param)) in params.iter().enumerate() {
            if let Some(text) = param.as_str() {
                let pos = writer.position();
                patch(&mut writer, idx, param.type_id()?, pos)?;
                writer.null_string(text)?;
                writer.align(4)?;
            }
        }
        let end = writer.position();

        let mut flags = HeaderFlags::UTF8;
        if endian == Endian::Little {
            flags |= HeaderFlags::LITTLE_ENDIAN;
        }
        writer.write_at(
            0,
            &Header {
                version: 2,
                flags: flags.bits(),
                file_size: end as u32,
                pio_version: self.version,
                pio_offset: type_len as u32,
                list_count: lists.len() as u32,
                object_count: objects.len() as u32,
                param_count: params.len() as u32,
                data_section_size: (string_start - data_start) as u32,
                string_section_size: (end - string_start) as u32,
                unknown_section_size: 0,
            },
        )?;
        Ok(writer.into_inner())
    }
}

fn write_value(writer: &mut Writer, param: &Parameter) -> Result<()> {
    match param {
        Parameter::Bool(v) => writer.u32(*v as u32),
        Parameter::F32(v) => writer.f32(*v),
        Parameter::Int(v) => writer.i32(*v),
        Parameter::U32(v) => writer.u32(*v),
        Parameter::Vec2(v) => v.iter().try_for_each(|f| writer.f32(*f)),
        Parameter::Vec3(v) => v.iter().try_for_each(|f| writer.f32(*f)),
        Parameter::Vec4(v) | Parameter::Color(v) | Parameter::Quat(v) => {
            v.iter().try_for_each(|f| writer.f32(*f))
        }
        Parameter::Curve(curves) => curves.iter().try_for_each(|curve| {
            writer.u32(curve.a)?;
            writer.u32(curve.b)?;
            curve.floats.iter().try_for_each(|f| writer.f32(*f))
        }),
        Parameter::BufferInt(v) => v.iter().try_for_each(|x| writer.i32(*x)),
        Parameter::BufferF32(v) => v.iter().try_for_each(|x| writer.f32(*x)),
        Parameter::BufferU32(v) => v.iter().try_for_each(|x| writer.u32(*x)),
        Parameter::BufferBinary(v) => writer.bytes(v),
        Parameter::String32(_)
        | Parameter::String64(_)
        | Parameter::String256(_)
        | Parameter::StringRef(_) => Ok(()),
    }
}
