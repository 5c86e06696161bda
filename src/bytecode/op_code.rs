use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // stack
    OpPop = 0,
    OpNoop = 1,
    OpSwap = 2,
    OpDup = 3,
    OpClear = 4,
    // data
    OpConst = 5,
    OpVector = 6,
    OpCollection = 7,
    OpCollect = 8,
    OpIndex = 9,
    OpRest = 10,
    OpSize = 11,
    OpTypeof = 12,
    // bindings
    OpLet = 13,
    OpRef = 14,
    OpDynamicRef = 15,
    OpRefGet = 16,
    OpRefSet = 17,
    // environments
    OpEnv = 18,
    OpCurrentEnv = 19,
    OpEnvExtend = 20,
    OpEnvUnhinge = 21,
    OpEnvCollect = 22,
    OpEnvPipe = 23,
    OpEnvSetInput = 24,
    OpEnvSetOutput = 25,
    // control
    OpJump = 26,
    OpJumpNe = 27,
    OpJumpLt = 28,
    OpJumpFail = 29,
    // frames and processes
    OpFrame = 30,
    OpReturn = 31,
    OpSpawn = 32,
    OpInvoke = 33,
    OpClosure = 34,
    OpIntrinsic = 35,
    // channels
    OpChannel = 36,
    OpWaitForClose = 37,
    // status
    OpCrash = 38,
    OpLastStatus = 39,
    OpCompensate = 40,
}

pub const OP_COUNT: u8 = 41;

/// How a static argument is interpreted, for disassembly and for
/// re-indexing when an image is linked into a larger program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// A plain number: a count, a slot index, a flag.
    Raw,
    /// An instruction address, usually carried by a label.
    Addr,
    /// An index into the constant table.
    Const,
    /// A symbol id.
    Sym,
    /// A symbol id naming an intrinsic registry entry.
    Intrinsic,
}

impl From<u8> for OpCode {
    fn from(byte: u8) -> Self {
        match byte {
            0 => OpCode::OpPop,
            1 => OpCode::OpNoop,
            2 => OpCode::OpSwap,
            3 => OpCode::OpDup,
            4 => OpCode::OpClear,
            5 => OpCode::OpConst,
            6 => OpCode::OpVector,
            7 => OpCode::OpCollection,
            8 => OpCode::OpCollect,
            9 => OpCode::OpIndex,
            10 => OpCode::OpRest,
            11 => OpCode::OpSize,
            12 => OpCode::OpTypeof,
            13 => OpCode::OpLet,
            14 => OpCode::OpRef,
            15 => OpCode::OpDynamicRef,
            16 => OpCode::OpRefGet,
            17 => OpCode::OpRefSet,
            18 => OpCode::OpEnv,
            19 => OpCode::OpCurrentEnv,
            20 => OpCode::OpEnvExtend,
            21 => OpCode::OpEnvUnhinge,
            22 => OpCode::OpEnvCollect,
            23 => OpCode::OpEnvPipe,
            24 => OpCode::OpEnvSetInput,
            25 => OpCode::OpEnvSetOutput,
            26 => OpCode::OpJump,
            27 => OpCode::OpJumpNe,
            28 => OpCode::OpJumpLt,
            29 => OpCode::OpJumpFail,
            30 => OpCode::OpFrame,
            31 => OpCode::OpReturn,
            32 => OpCode::OpSpawn,
            33 => OpCode::OpInvoke,
            34 => OpCode::OpClosure,
            35 => OpCode::OpIntrinsic,
            36 => OpCode::OpChannel,
            37 => OpCode::OpWaitForClose,
            38 => OpCode::OpCrash,
            39 => OpCode::OpLastStatus,
            40 => OpCode::OpCompensate,
            _ => panic!("Unknown opcode {}", byte),
        }
    }
}

impl OpCode {
    /// The dashed name instructions carry in images and disassembly.
    pub fn wire_name(self) -> &'static str {
        match self {
            OpCode::OpPop => "pop",
            OpCode::OpNoop => "noop",
            OpCode::OpSwap => "swap",
            OpCode::OpDup => "dup",
            OpCode::OpClear => "clear",
            OpCode::OpConst => "const",
            OpCode::OpVector => "vector",
            OpCode::OpCollection => "collection",
            OpCode::OpCollect => "collect",
            OpCode::OpIndex => "index",
            OpCode::OpRest => "rest",
            OpCode::OpSize => "size",
            OpCode::OpTypeof => "typeof",
            OpCode::OpLet => "let",
            OpCode::OpRef => "ref",
            OpCode::OpDynamicRef => "dynamic-ref",
            OpCode::OpRefGet => "ref-get",
            OpCode::OpRefSet => "ref-set",
            OpCode::OpEnv => "env",
            OpCode::OpCurrentEnv => "current-env",
            OpCode::OpEnvExtend => "env-extend",
            OpCode::OpEnvUnhinge => "env-unhinge",
            OpCode::OpEnvCollect => "env-collect",
            OpCode::OpEnvPipe => "env-pipe",
            OpCode::OpEnvSetInput => "env-set-input",
            OpCode::OpEnvSetOutput => "env-set-output",
            OpCode::OpJump => "jump",
            OpCode::OpJumpNe => "jumpne",
            OpCode::OpJumpLt => "jumplt",
            OpCode::OpJumpFail => "jumpfail",
            OpCode::OpFrame => "frame",
            OpCode::OpReturn => "return",
            OpCode::OpSpawn => "spawn",
            OpCode::OpInvoke => "invoke",
            OpCode::OpClosure => "closure",
            OpCode::OpIntrinsic => "intrinsic",
            OpCode::OpChannel => "channel",
            OpCode::OpWaitForClose => "wait-for-close",
            OpCode::OpCrash => "crash",
            OpCode::OpLastStatus => "last-status",
            OpCode::OpCompensate => "compensate",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<OpCode> {
        (0..OP_COUNT)
            .map(OpCode::from)
            .find(|op| op.wire_name() == name)
    }

    pub fn arg_kinds(self) -> &'static [ArgKind] {
        match self {
            OpCode::OpConst => &[ArgKind::Const],
            OpCode::OpVector
            | OpCode::OpIndex
            | OpCode::OpRest
            | OpCode::OpEnvSetInput
            | OpCode::OpEnvSetOutput => &[ArgKind::Raw],
            OpCode::OpLet | OpCode::OpRef => &[ArgKind::Sym],
            OpCode::OpJump
            | OpCode::OpJumpNe
            | OpCode::OpJumpLt
            | OpCode::OpJumpFail
            | OpCode::OpFrame
            | OpCode::OpSpawn
            | OpCode::OpClosure => &[ArgKind::Addr],
            OpCode::OpIntrinsic => &[ArgKind::Intrinsic],
            OpCode::OpCompensate => &[ArgKind::Addr, ArgKind::Raw],
            _ => &[],
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}
