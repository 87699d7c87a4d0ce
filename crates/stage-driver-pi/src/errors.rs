//! GCS error codes (`ERR?`).
//!
//! Positive codes are reported by the controller, negative ones by the
//! communication layer of the GCS library. The table is sorted by code.

use stage_core::error::DeviceFault;
use std::fmt;

static PI_ERRORS: &[(i64, &str, &str)] = &[
    (-67, "COM_USB_NOT_SUPPORTED", "USB is not supported"),
    (-66, "COM_NO_USB_DRIVER", "No USB driver installed"),
    (-65, "COM_USB_DEVICE_NOT_FOUND", "USB device not found"),
    (-64, "COM_INVALID_COM_PORT", "Invalid COM port"),
    (-63, "COM_DEVICE_CONNECTED", "Device already connected"),
    (-62, "COM_SOCKET_HOST_NOT_FOUND", "Host not found"),
    (-61, "COM_PCI_ACCESS_DENIED", "Driver could not be opened (on Vista: run as administrator!)"),
    (-60, "COM_PCI_INVALID_ID", "No device with this ID is present"),
    (-59, "COM_SOCKET_INTERRUPTED", "Operation was interrupted by a nonblocked signal"),
    (-58, "COM_SOCKET_NO_RESPONSE", "Can't connect to peer"),
    (-57, "COM_SOCKET_TERMINATED", "Connection terminated (by peer)"),
    (-56, "COM_SOCKET_NOT_CONNECTED", "Socket not connected (or not valid)"),
    (-55, "COM_SOCKET_PORT_IN_USE", "Port is used by another socket"),
    (-54, "COM_SOCKET_NOT_READY", "Socket not ready, you should call the function again"),
    (-53, "COM_PORT_CHECKSUM_ERROR", "Checksum error in received data from COM port"),
    (-52, "COM_PORT_ALREADY_OPEN", "Error while opening the COM port: was already open"),
    (-51, "COM_FTDIUSB_OTHER_ERROR", "FTDIUSB: other error"),
    (-50, "COM_FTDIUSB_NOT_SUPPORTED", "FTDIUSB: not supported"),
    (-49, "COM_FTDIUSB_INVALID_ARGS", "FTDIUSB: invalid arguments"),
    (-48, "COM_FTDIUSB_EEPROM_NOT_PROGRAMMED", " FTDIUSB: EEPROM not programmed"),
    (-47, "COM_FTDIUSB_EEPROM_NOT_PRESENT", "FTDIUSB: EEPROM not present"),
    (-46, "COM_FTDIUSB_EEPROM_ERASE_FAILED", "FTDIUSB: EEPROM erase failed"),
    (-45, "COM_FTDIUSB_EEPROM_WRITE_FAILED", "FTDIUSB: EEPROM write failed"),
    (-44, "COM_FTDIUSB_EEPROM_READ_FAILED", "FTDIUSB: EEPROM read failed"),
    (-43, "COM_FTDIUSB_FAILED_TO_WRITE_DEVICE", " FTDIUSB: failed to write device"),
    (-42, "COM_FTDIUSB_DEVICE_NOT_OPENED_FOR_WRITE", "FTDIUSB: device not opened for write "),
    (-41, "COM_FTDIUSB_DEVICE_NOT_OPENED_FOR_ERASE", "FTDIUSB: device not opened for erase"),
    (-40, "COM_FTDIUSB_INVALID_BAUD_RATE", "FTDIUSB: invalid baud rate"),
    (-39, "COM_FTDIUSB_INVALID_PARAMETER", "FTDIUSB: invalid parameter"),
    (-38, "COM_FTDIUSB_INSUFFICIENT_RESOURCES", "FTDIUSB: insufficient resources"),
    (-37, "COM_FTDIUSB_IO_ERROR", "FTDIUSB: IO error"),
    (-36, "COM_FTDIUSB_DEVICE_NOT_OPENED", "FTDIUSB: device not opened"),
    (-35, "COM_FTDIUSB_DEVICE_NOT_FOUND", "FTDIUSB: device not found"),
    (-34, "COM_FTDIUSB_INVALID_HANDLE", "FTDIUSB: invalid handle"),
    (-33, "COM_DLL_FUNC_ERROR", "A DLL or one of the required functions could not be loaded"),
    (-32, "COM_INTERNAL_RESOURCES_ERROR", "Error dealing with internal system resources (events, threads, ...)"),
    (-31, "COM_ERROR_RS_SETTINGS", "RS-232: Error configuring the COM port"),
    (-30, "COM_RS_INVALID_DATA_BITS", "RS-232: 5 data bits with 2 stop bits is an invalid combination, as is 6, 7, or 8 data bits with 1.5 stop bits"),
    (-29, "COM_GPIB_ELCK", "IEEE488: Address or board locked"),
    (-28, "COM_GPIB_ETAB", "IEEE488: Return buffer full"),
    (0, "PI_CNTR_NO_ERROR", "No error"),
    (1, "PI_CNTR_PARAM_SYNTAX", "Parameter syntax error"),
    (2, "PI_CNTR_UNKNOWN_COMMAND", "Unknown command"),
    (3, "PI_CNTR_COMMAND_TOO_LONG", "Command length out of limits or command buffer overrun"),
    (4, "PI_CNTR_SCAN_ERROR", "Error while scanning"),
    (5, "PI_CNTR_MOVE_WITHOUT_REF_OR_NO_SERVO", "Unallowable move attempted on unreferenced axis, or move attempted with servo off"),
    (6, "PI_CNTR_INVALID_SGA_PARAM", "Parameter for SGA not valid"),
    (7, "PI_CNTR_POS_OUT_OF_LIMITS", "Position out of limits"),
    (8, "PI_CNTR_VEL_OUT_OF_LIMITS", "Velocity out of limits"),
    (9, "PI_CNTR_SET_PIVOT_NOT_POSSIBLE", "Attempt to set pivot point while U,V and W not all 0"),
    (10, "PI_CNTR_STOP", "Controller was stopped by command"),
    (11, "PI_CNTR_SST_OR_SCAN_RANGE", "Parameter for SST or for one of the embedded scan algorithms out of range"),
    (12, "PI_CNTR_INVALID_SCAN_AXES", "Invalid axis combination for fast scan"),
    (13, "PI_CNTR_INVALID_NAV_PARAM", "Parameter for NAV out of range"),
    (14, "PI_CNTR_INVALID_ANALOG_INPUT", "Invalid analog channel"),
    (15, "PI_CNTR_INVALID_AXIS_IDENTIFIER", "Invalid axis identifier"),
    (16, "PI_CNTR_INVALID_STAGE_NAME", "Unknown stage name"),
    (17, "PI_CNTR_PARAM_OUT_OF_RANGE", "Parameter out of range"),
    (18, "PI_CNTR_INVALID_MACRO_NAME", "Invalid macro name"),
    (19, "PI_CNTR_MACRO_RECORD", "Error while recording macro"),
    (20, "PI_CNTR_MACRO_NOT_FOUND", "Macro not found"),
    (21, "PI_CNTR_AXIS_HAS_NO_BRAKE", "Axis has no brake"),
    (22, "PI_CNTR_DOUBLE_AXIS", "Axis identifier specified more than once"),
    (23, "PI_CNTR_ILLEGAL_AXIS", "Illegal axis"),
    (24, "PI_CNTR_PARAM_NR", "Incorrect number of parameters"),
    (25, "PI_CNTR_INVALID_REAL_NR", "Invalid floating point number"),
    (26, "PI_CNTR_MISSING_PARAM", "Parameter missing"),
    (27, "PI_CNTR_SOFT_LIMIT_OUT_OF_RANGE", "Soft limit out of range"),
    (28, "PI_CNTR_NO_MANUAL_PAD", "No manual pad found"),
    (29, "PI_CNTR_NO_JUMP", "No more step-response values"),
    (30, "PI_CNTR_INVALID_JUMP", "No step-response values recorded"),
    (31, "PI_CNTR_AXIS_HAS_NO_REFERENCE", "Axis has no reference sensor"),
    (32, "PI_CNTR_STAGE_HAS_NO_LIM_SWITCH", "Axis has no limit switch"),
    (33, "PI_CNTR_NO_RELAY_CARD", "No relay card installed"),
    (34, "PI_CNTR_CMD_NOT_ALLOWED_FOR_STAGE", "Command not allowed for selected stage(s)"),
    (35, "PI_CNTR_NO_DIGITAL_INPUT", "No digital input installed"),
    (36, "PI_CNTR_NO_DIGITAL_OUTPUT", "No digital output configured"),
    (37, "PI_CNTR_NO_MCM", "No more MCM responses"),
    (38, "PI_CNTR_INVALID_MCM", "No MCM values recorded"),
    (39, "PI_CNTR_INVALID_CNTR_NUMBER", "Controller number invalid"),
    (40, "PI_CNTR_NO_JOYSTICK_CONNECTED", "No joystick configured"),
    (41, "PI_CNTR_INVALID_EGE_AXIS", "Invalid axis for electronic gearing, axis can not be slave"),
    (42, "PI_CNTR_SLAVE_POSITION_OUT_OF_RANGE", "Position of slave axis is out of range"),
    (43, "PI_CNTR_COMMAND_EGE_SLAVE", "Slave axis cannot be commanded directly when electronic gearing is enabled"),
    (44, "PI_CNTR_JOYSTICK_CALIBRATION_FAILED", "Calibration of joystick failed"),
    (45, "PI_CNTR_REFERENCING_FAILED", "Referencing failed"),
    (46, "PI_CNTR_OPM_MISSING", "OPM (Optical Power Meter) missing"),
    (47, "PI_CNTR_OPM_NOT_INITIALIZED", "OPM (Optical Power Meter) not initialized or cannot be initialized"),
    (48, "PI_CNTR_OPM_COM_ERROR", "OPM (Optical Power Meter) Communication Error "),
    (49, "PI_CNTR_MOVE_TO_LIMIT_SWITCH_FAILED", "Move to limit switch failed"),
    (50, "PI_CNTR_REF_WITH_REF_DISABLED", "Attempt to reference axis with referencing disabled"),
    (51, "PI_CNTR_AXIS_UNDER_JOYSTICK_CONTROL", "Selected axis is controlled by joystick"),
    (52, "PI_CNTR_COMMUNICATION_ERROR", "Controller detected communication error"),
    (53, "PI_CNTR_DYNAMIC_MOVE_IN_PROCESS", "MOV! motion still in progress"),
    (54, "PI_CNTR_UNKNOWN_PARAMETER", "Unknown parameter"),
    (55, "PI_CNTR_NO_REP_RECORDED", "No commands were recorded with REP"),
    (56, "PI_CNTR_INVALID_PASSWORD", "Password invalid"),
    (57, "PI_CNTR_INVALID_RECORDER_CHAN", "Data Record Table does not exist"),
    (58, "PI_CNTR_INVALID_RECORDER_SRC_OPT", "Source does not exist; number too low or too high"),
    (59, "PI_CNTR_INVALID_RECORDER_SRC_CHAN", "Source Record Table number too low or too high"),
    (60, "PI_CNTR_PARAM_PROTECTION", "Protected Param: current Command Level (CCL) too low"),
    (61, "PI_CNTR_AUTOZERO_RUNNING", "Command execution not possible while Autozero is running"),
    (62, "PI_CNTR_NO_LINEAR_AXIS", "Autozero requires at least one linear axis"),
    (63, "PI_CNTR_INIT_RUNNING", "Initialization still in progress"),
    (64, "PI_CNTR_READ_ONLY_PARAMETER", "Parameter is read-only"),
    (65, "PI_CNTR_PAM_NOT_FOUND", "Parameter not found in non-volatile memory"),
    (66, "PI_CNTR_VOL_OUT_OF_LIMITS", "Voltage out of limits"),
    (67, "PI_CNTR_WAVE_TOO_LARGE", "Not enough memory available for requested wave curve"),
    (68, "PI_CNTR_NOT_ENOUGH_DDL_MEMORY", "Not enough memory available for DDL table; DDL can not be started"),
    (69, "PI_CNTR_DDL_TIME_DELAY_TOO_LARGE", "Time delay larger than DDL table; DDL can not be started"),
    (70, "PI_CNTR_DIFFERENT_ARRAY_LENGTH", "The requested arrays have different lengths; query them separately"),
    (71, "PI_CNTR_GEN_SINGLE_MODE_RESTART", "Attempt to restart the generator while it is running in single step mode"),
    (72, "PI_CNTR_ANALOG_TARGET_ACTIVE", "Motion commands and wave generator activation are not allowed when analog target is active"),
    (73, "PI_CNTR_WAVE_GENERATOR_ACTIVE", "Motion commands are not allowed when wave generator is active"),
    (74, "PI_CNTR_AUTOZERO_DISABLED", "No sensor channel or no piezo channel connected to selected axis (sensor andpiezo matrix)"),
    (75, "PI_CNTR_NO_WAVE_SELECTED", "Generator started (WGO) without having selected a wave table (WSL)."),
    (76, "PI_CNTR_IF_BUFFER_OVERRUN", "Interface buffer did overrun and command couldn't be received correctly"),
    (77, "PI_CNTR_NOT_ENOUGH_RECORDED_DATA", "Data Record Table does not hold enough recorded data"),
    (78, "PI_CNTR_TABLE_DEACTIVATED", "Data Record Table is not configured for recording"),
    (79, "PI_CNTR_OPENLOOP_VALUE_SET_WHEN_SERVO_ON", "Open-loop commands (SVA,SVR) are not allowed when servo is on"),
    (80, "PI_CNTR_RAM_ERROR", "Hardware error affecting RAM"),
    (81, "PI_CNTR_MACRO_UNKNOWN_COMMAND", "Not macro command"),
    (82, "PI_CNTR_MACRO_PC_ERROR", "Macro counter out of range"),
    (83, "PI_CNTR_JOYSTICK_ACTIVE", "Joystick is active"),
    (84, "PI_CNTR_MOTOR_IS_OFF", "Motor is off"),
    (85, "PI_CNTR_ONLY_IN_MACRO", "Macro-only command"),
    (86, "PI_CNTR_JOYSTICK_UNKNOWN_AXIS", "Invalid joystick axis"),
    (87, "PI_CNTR_JOYSTICK_UNKNOWN_ID", "Joystick unknown"),
    (88, "PI_CNTR_REF_MODE_IS_ON", "Move without referenced stage"),
    (89, "PI_CNTR_NOT_ALLOWED_IN_CURRENT_MOTION_MODE", "Command not allowed in current motion mode"),
    (90, "PI_CNTR_DIO_AND_TRACING_NOT_POSSIBLE", "No tracing possible while digital IOs are used on this HW revision. Reconnect to switch operation mode."),
    (91, "PI_CNTR_COLLISION", "Move not possible, would cause collision"),
    (92, "PI_CNTR_SLAVE_NOT_FAST_ENOUGH", "Stage is not capable of following the master. Check the gear ratio."),
    (93, "PI_CNTR_CMD_NOT_ALLOWED_WHILE_AXIS_IN_MOTION", "This command is not allowed while the affected axis or its master is in motion."),
    (94, "PI_CNTR_OPEN_LOOP_JOYSTICK_ENABLED", "Servo cannot be switched on when open-loop joystick control is activated."),
    (95, "PI_CNTR_INVALID_SERVO_STATE_FOR_PARAMETER", "This parameter cannot be changed in current servo mode."),
    (96, "PI_CNTR_UNKNOWN_STAGE_NAME", "Unknown stage name"),
    (97, "PI_CNTR_INVALID_VALUE_LENGTH", "Invalid length of value (too much characters)"),
    (98, "PI_CNTR_AUTOZERO_FAILED", "AutoZero procedure was not successful"),
    (99, "PI_CNTR_SENSOR_VOLTAGE_OFF", "Sensor voltage is off"),
    (100, "PI_LABVIEW_ERROR", "PI driver for use with NILabVIEW reports error. See source control for details."),
    (200, "PI_CNTR_NO_AXIS", "No stage connected to axis"),
    (201, "PI_CNTR_NO_AXIS_PARAM_FILE", "File with axis parameters not found"),
    (202, "PI_CNTR_INVALID_AXIS_PARAM_FILE", "Invalid axis parameter file"),
    (203, "PI_CNTR_NO_AXIS_PARAM_BACKUP", "Backup file with axis parameters not found"),
    (204, "PI_CNTR_RESERVED_204", "PI internal error code 204"),
    (205, "PI_CNTR_SMO_WITH_SERVO_ON", "SMO with servo on"),
    (206, "PI_CNTR_UUDECODE_INCOMPLETE_HEADER", "uudecode: incomplete header "),
    (207, "PI_CNTR_UUDECODE_NOTHING_TO_DECODE", "uudecode: nothing to decode"),
    (208, "PI_CNTR_UUDECODE_ILLEGAL_FORMAT", "uudecode: illegal UUE format"),
    (209, "PI_CNTR_CRC32_ERROR", "CRC32 error"),
    (210, "PI_CNTR_ILLEGAL_FILENAME", "Illegal file name (must be 8-0 format)"),
    (211, "PI_CNTR_FILE_NOT_FOUND", "File not found on controller"),
    (212, "PI_CNTR_FILE_WRITE_ERROR", "Error writing file on controller"),
    (213, "PI_CNTR_DTR_HINDERS_VELOCITY_CHANGE", "VEL command not allowed in DTR Command Mode"),
    (214, "PI_CNTR_POSITION_UNKNOWN", "Position calculations failed"),
    (215, "PI_CNTR_CONN_POSSIBLY_BROKEN", "The connection between controller and stage may be broken"),
    (216, "PI_CNTR_ON_LIMIT_SWITCH", "The connected stage has driven into a limit switch, some controllers need CLR to resume operation"),
    (217, "PI_CNTR_UNEXPECTED_STRUT_STOP", "Strut test command failed because of an unexpected strut stop"),
    (218, "PI_CNTR_POSITION_BASED_ON_ESTIMATION", "While MOV! is running position can only beestimated!"),
    (219, "PI_CNTR_POSITION_BASED_ON_INTERPOLATION", "Position was calculated during MOV motion"),
    (220, "PI_CNTR_INTERPOLATION_FIFO_UNDERRUN", "FIFO buffer underrun during interpolation"),
    (221, "PI_CNTR_INTERPOLATION_FIFO_OVERFLOW", "FIFO buffer overflow during interpolation"),
    (230, "PI_CNTR_INVALID_HANDLE", "Invalid handle"),
    (231, "PI_CNTR_NO_BIOS_FOUND", "No bios found"),
    (232, "PI_CNTR_SAVE_SYS_CFG_FAILED", "Save system configuration failed"),
    (233, "PI_CNTR_LOAD_SYS_CFG_FAILED", "Load system configuration failed"),
    (301, "PI_CNTR_SEND_BUFFER_OVERFLOW", "Send buffer overflow"),
    (302, "PI_CNTR_VOLTAGE_OUT_OF_LIMITS", "Voltage out of limits"),
    (303, "PI_CNTR_OPEN_LOOP_MOTION_SET_WHEN_SERVO_ON", "Open-loop motion attempted when servo ON"),
    (304, "PI_CNTR_RECEIVING_BUFFER_OVERFLOW", "Received command is too long"),
    (305, "PI_CNTR_EEPROM_ERROR", "Error while reading/writing EEPROM"),
    (306, "PI_CNTR_I2C_ERROR", "Error on I2C bus"),
    (307, "PI_CNTR_RECEIVING_TIMEOUT", "Timeout while receiving command"),
    (308, "PI_CNTR_TIMEOUT", "A lengthy operation has not finished in the expected time"),
    (309, "PI_CNTR_MACRO_OUT_OF_SPACE", "Insufficient space to store macro"),
    (310, "PI_CNTR_EUI_OLDVERSION_CFGDATA", "Configuration data has old version number"),
    (311, "PI_CNTR_EUI_INVALID_CFGDATA", "Invalid configuration data"),
    (333, "PI_CNTR_HARDWARE_ERROR", "Internal hardware error"),
    (400, "PI_CNTR_WAV_INDEX_ERROR", "Wave generator index error"),
    (401, "PI_CNTR_WAV_NOT_DEFINED", "Wave table not defined"),
    (402, "PI_CNTR_WAV_TYPE_NOT_SUPPORTED", "Wave type not supported"),
    (403, "PI_CNTR_WAV_LENGTH_EXCEEDS_LIMIT", "Wave length exceeds limit"),
    (404, "PI_CNTR_WAV_PARAMETER_NR", "Wave parameter number error"),
    (405, "PI_CNTR_WAV_PARAMETER_OUT_OF_LIMIT", "Wave parameter out of range"),
    (406, "PI_CNTR_WGO_BIT_NOT_SUPPORTED", "WGO command bit not supported"),
    (500, "PI_CNTR_EMERGENCY_STOP_BUTTON_ACTIVATED", "The \"red knob\" is still set and disables system"),
    (501, "PI_CNTR_EMERGENCY_STOP_BUTTON_WAS_ACTIVATED", "The \"red knob\" was activated and still disables system - reanimation required"),
    (502, "PI_CNTR_REDUNDANCY_LIMIT_EXCEEDED", "Position consistency check failed"),
    (503, "PI_CNTR_COLLISION_SWITCH_ACTIVATED", "Hardware collision sensor(s) are activated"),
    (504, "PI_CNTR_FOLLOWING_ERROR", "Strut following error occurred, e.g. caused by overload or encoder failure"),
    (505, "PI_CNTR_SENSOR_SIGNAL_INVALID", "One sensor signal is not valid"),
    (506, "PI_CNTR_SERVO_LOOP_UNSTABLE", "Servo loop was unstable due to wrong parameter setting and switched off to avoid damage."),
    (507, "PI_CNTR_LOST_SPI_SLAVE_CONNECTION", "Digital connection to external SPI slave device is lost"),
    (508, "PI_CNTR_MOVE_ATTEMPT_NOT_PERMITTED", "Move attempt not permitted due to customer or limit settings"),
    (509, "PI_CNTR_TRIGGER_EMERGENCY_STOP", "Emergency stop caused by trigger input"),
    (530, "PI_CNTR_NODE_DOES_NOT_EXIST", "A command refers to a node that does not exist"),
    (531, "PI_CNTR_PARENT_NODE_DOES_NOT_EXIST", "A command refers to a node that has no parent node"),
    (532, "PI_CNTR_NODE_IN_USE", "Attempt to delete a node that is in use"),
    (533, "PI_CNTR_NODE_DEFINITION_IS_CYCLIC", "Definition of a node is cyclic"),
    (536, "PI_CNTR_HEXAPOD_IN_MOTION", "Transformation cannot be defined as long as Hexapod is in motion"),
    (537, "PI_CNTR_TRANSFORMATION_TYPE_NOT_SUPPORTED", "Transformation node cannot be activated"),
    (539, "PI_CNTR_NODE_PARENT_IDENTICAL_TO_CHILD", "A node cannot be linked to itself"),
    (540, "PI_CNTR_NODE_DEFINITION_INCONSISTE", "NT"),
    (542, "PI_CNTR_NODES_NOT_IN_SAME_CHAIN", "The nodes are not part of the Node definition is erroneous or not complete (replace or delete it) same chain"),
    (543, "PI_CNTR_NODE_MEMORY_FULL", "Unused nodes must be deleted before new nodes can be stored"),
    (544, "PI_CNTR_PIVOT_POINT_FEATURE_NOT_SUPPORTED", "With some transformations pivot point usage is not supported"),
    (545, "PI_CNTR_SOFTLIMITS_INVALID", "Soft limits invalid due to changes in coordinate system "),
    (546, "PI_CNTR_CS_WRITE_PROTECTED", "Coordinate system is write protected"),
    (547, "PI_CNTR_CS_CONTENT_FROM_CONFIG_FILE", "Coordinate system cannot be changed because its content is loaded from a configuration file"),
    (548, "PI_CNTR_CS_CANNOT_BE_LINKED", "Coordinate system may not be linked"),
    (549, "PI_CNTR_KSB_CS_ROTATION_ONLY", "A KSB-type coordinate system can only be rotated by multiples of 90 degrees"),
    (551, "PI_CNTR_CS_DATA_CANNOT_BE_QUERIED", "This query is not supported for this coordinate system type"),
    (552, "PI_CNTR_CS_COMBINATION_DOES_NOT_EXIST", "This combination of work-and-tool coordinate system does not exist"),
    (553, "PI_CNTR_CS_COMBINATION_INVALID", "The combination must consist of one work and one tool coordinate system"),
    (554, "PI_CNTR_CS_TYPE_DOES_NOT_EXIST", "This coordinate system type does not exist"),
    (555, "PI_CNTR_UNKNOWN_ERROR", "BasMac: unknown controller error"),
    (556, "PI_CNTR_CS_TYPE_NOT_ACTIVATED", "No coordinate system of this type is activated"),
    (557, "PI_CNTR_CS_NAME_INVALID", "Name of coordinate system is invalid"),
    (558, "PI_CNTR_CS_GENERAL_FILE_MISSING", "File with stored CS systems is missing or erroneous"),
    (559, "PI_CNTR_CS_LEVELING_FILE_MISSING", "File with leveling CS is missing or erroneous"),
    (601, "PI_CNTR_NOT_ENOUGH_MEMORY", "not enough memory"),
    (602, "PI_CNTR_HW_VOLTAGE_ERROR", "hardware voltage error"),
    (603, "PI_CNTR_HW_TEMPERATURE_ERROR", "hardware temperature out of range"),
    (604, "PI_CNTR_POSITION_ERROR_TOO_HIGH", "Position error of any axis in the system is too high"),
    (606, "PI_CNTR_INPUT_OUT_OF_RANGE", "Maximum value of input signal has been exceeded"),
    (607, "PI_CNTR_NO_INTEGER", "Value is not integer"),
    (608, "PI_CNTR_FAST_ALIGNMENT_PROCESS_IS_NOT_RUNNING", "Fast alignment process cannot be paused because it is not running"),
    (609, "PI_CNTR_FAST_ALIGNMENT_PROCESS_IS_NOT_PAUSED", "Fast alignment process cannot be restarted/resumed because it is not paused"),
    (650, "PI_CNTR_UNABLE_TO_SET_PARAM_WITH_SPA", "Parameter could not be set with SPA - SEP needed?"),
    (651, "PI_CNTR_PHASE_FINDING_ERROR", "Phase finding error"),
    (652, "PI_CNTR_SENSOR_SETUP_ERROR", "Sensor setup error"),
    (653, "PI_CNTR_SENSOR_COMM_ERROR", "Sensor communication error"),
    (654, "PI_CNTR_MOTOR_AMPLIFIER_ERROR", "Motor amplifier error"),
    (655, "PI_CNTR_OVER_CURR_PROTEC_TRIGGERED_BY_I2T", "Overcurrent protection triggered by I2T-module"),
    (656, "PI_CNTR_OVER_CURR_PROTEC_TRIGGERED_BY_AMP_MODULE", "Overcurrent protection triggered by amplifier module"),
    (657, "PI_CNTR_SAFETY_STOP_TRIGGERED", "Safety stop triggered"),
    (658, "PI_SENSOR_OFF", "Sensor off?"),
    (659, "PI_CNTR_PARAM_CONFLICT", "Parameter could not be set. Conflict with another parameter."),
    (700, "PI_CNTR_COMMAND_NOT_ALLOWED_IN_EXTERNAL_MODE", "Command not allowed in external mode"),
    (710, "PI_CNTR_EXTERNAL_MODE_ERROR", "External mode communication error"),
    (715, "PI_CNTR_INVALID_MODE_OF_OPERATION", "Invalid mode of operation"),
    (716, "PI_CNTR_FIRMWARE_STOPPED_BY_CMD", "Firmware stopped by command (#27)"),
    (717, "PI_CNTR_EXTERNAL_MODE_DRIVER_MISSING", "External mode driver missing"),
    (718, "PI_CNTR_CONFIGURATION_FAILURE_EXTERNAL_MODE", "Missing or incorrect configuration of external mode"),
    (719, "PI_CNTR_EXTERNAL_MODE_CYCLETIME_INVALID", "External mode cycletime invalid"),
    (720, "PI_CNTR_BRAKE_ACTIVATED", "Brake is activated"),
    (725, "PI_CNTR_DRIVE_STATE_TRANSITION_ERROR", "Drive state transition error"),
    (731, "PI_CNTR_SURFACEDETECTION_RUNNING", "Command not allowed while surface detection is running"),
    (732, "PI_CNTR_SURFACEDETECTION_FAILED", "Last surface detection failed"),
    (733, "PI_CNTR_FIELDBUS_IS_ACTIVE", "Fieldbus is active and is blocking GCS control commands"),
    (1000, "PI_CNTR_TOO_MANY_NESTED_MACROS", "Too many nested macros"),
    (1001, "PI_CNTR_MACRO_ALREADY_DEFINED", "Macro already defined"),
    (1002, "PI_CNTR_NO_MACRO_RECORDING", "Macro recording not activated"),
    (1003, "PI_CNTR_INVALID_MAC_PARAM", "Invalid parameter for MAC"),
    (1004, "PI_CNTR_RESERVED_1004", "PI internal error code 1004"),
    (1005, "PI_CNTR_CONTROLLER_BUSY", "Controller is busy with some lengthy operation (e.g. reference move, fast scan algorithm)"),
    (1006, "PI_CNTR_INVALID_IDENTIFIER", "Invalid identifier (invalid special characters, ...)"),
    (1007, "PI_CNTR_UNKNOWN_VARIABLE_OR_ARGUMENT", "Variable or argument not defined"),
    (1008, "PI_CNTR_RUNNING_MACRO", "Controller is (already) running a macro"),
    (1009, "PI_CNTR_MACRO_INVALID_OPERATOR", "Invalid or missing operator for condition. Check necessary spaces around operator."),
    (1010, "PI_CNTR_MACRO_NO_ANSWER", "No response was received while executing WAC/MEX/JRC/..."),
    (1011, "PI_CMD_NOT_VALID_IN_MACRO_MODE", "Command not valid during macro execution"),
    (1012, "PI_CNTR_ERROR_IN_MACRO", "Error occured during macro execution"),
    (1013, "PI_CNTR_NO_MACRO_OR_EMPTY", "No macro with given name on controller, or macro is empty"),
    (1015, "PI_CNTR_INVALID_ARGUMENT", "One or more arguments given to function is invalid (empty string, index out of range, ...)"),
    (1024, "PI_CNTR_MOTION_ERROR", "Motion error: position error too large, servo is switched off automatically "),
    (1025, "PI_CNTR_MAX_MOTOR_OUTPUT_REACHED", "Maximum motor output reached"),
    (1028, "PI_CNTR_UNKNOWN_CHANNEL_IDENTIFIER", "Unknown channel identifier"),
    (1063, "PI_CNTR_EXT_PROFILE_UNALLOWED_CMD", "User Profile Mode: Command is not allowed, check for required preparatory commands"),
    (1064, "PI_CNTR_EXT_PROFILE_EXPECTING_MOTION_ERROR", "User Profile Mode: First target position in User Profile is too far from current position"),
    (1065, "PI_CNTR_PROFILE_ACTIVE", "Controller is (already) in User Profile Mode"),
    (1066, "PI_CNTR_PROFILE_INDEX_OUT_OF_RANGE", "User Profile Mode: Block or Data Set index out of allowed range "),
    (1071, "PI_CNTR_PROFILE_OUT_OF_MEMORY", "User Profile Mode: Out of memory"),
    (1072, "PI_CNTR_PROFILE_WRONG_CLUSTER", "User Profile Mode: Cluster is not assigned to this axis"),
    (1073, "PI_CNTR_PROFILE_UNKNOWN_CLUSTER_IDENTIFIER", "Unknown cluster identifier"),
    (1090, "PI_CNTR_TOO_MANY_TCP_CONNECTIONS_OPEN", "There are too many open tcpip connections"),
    (2000, "PI_CNTR_ALREADY_HAS_SERIAL_NUMBER", "Controller already has a serial number"),
    (2100, "PI_CNTR_FEATURE_LICENSE_INVALID", "Entered license is invalid"),
    (4000, "PI_CNTR_SECTOR_ERASE_FAILED", "Sector erase failed"),
    (4001, "PI_CNTR_FLASH_PROGRAM_FAILED", "Flash program failed"),
    (4002, "PI_CNTR_FLASH_READ_FAILED", "Flash read failed"),
    (4003, "PI_CNTR_HW_MATCHCODE_ERROR", "HW match code missing/invalid"),
    (4004, "PI_CNTR_FW_MATCHCODE_ERROR", "FW match code missing/invalid"),
    (4005, "PI_CNTR_HW_VERSION_ERROR", "HW version missing/invalid"),
    (4006, "PI_CNTR_FW_VERSION_ERROR", "FW version missing/invalid"),
    (4007, "PI_CNTR_FW_UPDATE_ERROR", "FW update failed"),
    (4008, "PI_CNTR_FW_CRC_PAR_ERROR", "FW Parameter CRC wrong"),
    (4009, "PI_CNTR_FW_CRC_FW_ERROR", "FW CRC wrong"),
    (5000, "PI_CNTR_INVALID_PCC_SCAN_DATA", "PicoCompensation scan data is not valid"),
    (5001, "PI_CNTR_PCC_SCAN_RUNNING", "PicoCompensation is running, some actions can not be executed during scanning/recording"),
    (5002, "PI_CNTR_INVALID_PCC_AXIS", "Given axis cannot be definedas PPC axis"),
    (5003, "PI_CNTR_PCC_SCAN_OUT_OF_RANGE", "Defined scan area is larger than the travel range"),
    (5004, "PI_CNTR_PCC_TYPE_NOT_EXISTING", "Given PicoCompensation type is not defined"),
    (5005, "PI_CNTR_PCC_PAM_ERROR", "PicoCompensation parameter error"),
    (5006, "PI_CNTR_PCC_TABLE_ARRAY_TOO_LARGE", "PicoCompensation table is larger than maximum table length"),
    (5100, "PI_CNTR_NEXLINE_ERROR", "Common error in NEXLINE® firmware module"),
    (5101, "PI_CNTR_CHANNEL_ALREADY_USED", "Output channel for NEXLINE® can not be redefined for other usage"),
    (5102, "PI_CNTR_NEXLINE_TABLE_TOO_SMALL", "Memory for NEXLINE® signals is too small"),
    (5103, "PI_CNTR_RNP_WITH_SERVO_ON", "RNP can not be executed if axis is in closed loop"),
    (5104, "PI_CNTR_RNP_NEEDED", "Relax procedure (RNP) needed"),
    (5200, "PI_CNTR_AXIS_NOT_CONFIGURED", "Axis must be configured for this action"),
    (5300, "PI_CNTR_FREQU_ANALYSIS_FAILED", "Frequency analysis failed"),
    (5301, "PI_CNTR_FREQU_ANALYSIS_RUNNING", "Another frequency analysis is running"),
    (6000, "PI_CNTR_SENSOR_ABS_INVALID_VALUE", "Invalid preset value of absolute sensor"),
    (6001, "PI_CNTR_SENSOR_ABS_WRITE_ERROR", "Error while writing to sensor"),
    (6002, "PI_CNTR_SENSOR_ABS_READ_ERROR", "Error while reading from sensor"),
    (6003, "PI_CNTR_SENSOR_ABS_CRC_ERROR", "Checksum error of absolute sensor"),
    (6004, "PI_CNTR_SENSOR_ABS_ERROR", "General error of absolute sensor"),
    (6005, "PI_CNTR_SENSOR_ABS_OVERFLOW", "Overflow of absolute sensor position"),
];

/// A GCS error code with its symbolic name and description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PiError {
    /// Numeric code.
    pub code: i64,
    /// Symbolic name, e.g. `PI_CNTR_POS_OUT_OF_LIMITS`.
    pub name: &'static str,
    /// Human readable description.
    pub description: &'static str,
}

impl PiError {
    /// `ERR?` reply when no error occurred.
    pub const NO_ERROR: i64 = 0;

    /// Look a code up. Unknown codes are kept with a generic description.
    pub fn from_code(code: i64) -> Self {
        match PI_ERRORS.binary_search_by_key(&code, |(c, _, _)| *c) {
            Ok(i) => {
                let (code, name, description) = PI_ERRORS[i];
                Self {
                    code,
                    name,
                    description,
                }
            }
            Err(_) => Self {
                code,
                name: "UNKNOWN",
                description: "Unknown error",
            },
        }
    }

    /// Whether the code reports an error.
    pub fn is_error(&self) -> bool {
        self.code != Self::NO_ERROR
    }

    /// As a device fault of the controller at `address`.
    pub fn to_fault(&self, address: u8) -> DeviceFault {
        DeviceFault::new(
            format!("PI #{address}"),
            self.code,
            format!("{} ({})", self.description, self.name),
        )
    }
}

impl fmt::Display for PiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted() {
        assert!(PI_ERRORS.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_lookup() {
        let err = PiError::from_code(7);
        assert_eq!(err.name, "PI_CNTR_POS_OUT_OF_LIMITS");
        assert_eq!(err.to_string(), "Position out of limits");
        assert!(err.is_error());
        assert!(!PiError::from_code(0).is_error());
        assert_eq!(PiError::from_code(-67).name, "COM_USB_NOT_SUPPORTED");
    }

    #[test]
    fn test_unknown_code() {
        let err = PiError::from_code(123_456);
        assert_eq!(err.code, 123_456);
        assert_eq!(err.name, "UNKNOWN");
    }

    #[test]
    fn test_fault() {
        let fault = PiError::from_code(5).to_fault(2);
        assert_eq!(fault.device, "PI #2");
        assert_eq!(fault.code, 5);
        assert!(fault.description.contains("PI_CNTR_MOVE_WITHOUT_REF_OR_NO_SERVO"));
    }
}
